use kube::core::CustomResourceExt;
use rns_operator::crd::rados_namespace::CephBlockPoolRadosNamespace;

fn main() {
    let crd = CephBlockPoolRadosNamespace::crd();
    match serde_yaml::to_string(&crd) {
        Ok(yaml) => println!("{}", yaml),
        Err(e) => {
            eprintln!("failed to serialize CRD to YAML: {e}");
            std::process::exit(1);
        }
    }
}
