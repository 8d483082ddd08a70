use breakglass_types::*;
use kube::CustomResourceExt;
use std::fs;

fn main() {
    let _ = fs::create_dir("../crds");
    fs::write(
        "../crds/breakglass.dev_breakglassrequests_crd.yaml",
        serde_yaml::to_string(&BreakglassRequest::crd()).unwrap(),
    )
    .unwrap();
}
