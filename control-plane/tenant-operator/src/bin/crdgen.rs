use kube::core::CustomResourceExt;
use tenant_operator::crd::{tenant::Tenant, workspace::Workspace};

fn main() {
    let crds = [Workspace::crd(), Tenant::crd()];
    let docs: Vec<String> = crds
        .iter()
        .map(|crd| serde_yaml::to_string(crd).expect("serialize CRD to YAML"))
        .collect();
    println!("{}", docs.join("---\n"));
}
