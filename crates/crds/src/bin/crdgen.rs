//! Print the Machine CRD as YAML

use crds::Machine;
use kube::CustomResourceExt;

fn main() -> Result<(), serde_yaml::Error> {
    print!("{}", serde_yaml::to_string(&Machine::crd())?);
    Ok(())
}
