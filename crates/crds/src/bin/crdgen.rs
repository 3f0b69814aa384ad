//! Prints the CRD manifests for all metadr resource kinds as YAML.

use anyhow::Result;
use kube::CustomResourceExt;

fn main() -> Result<()> {
    let crds = [
        crds::BackupLocation::crd(),
        crds::MetadataBackupPolicy::crd(),
        crds::MetadataBackupRecord::crd(),
        crds::MetadataRestore::crd(),
    ];

    for crd in &crds {
        println!("---");
        print!("{}", serde_yaml::to_string(crd)?);
    }

    Ok(())
}
