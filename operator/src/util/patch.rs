use super::MANAGER_NAME;
use breakglass_types::{BreakglassRequest, BreakglassRequestStatus};
use kube::{
    Client, Error,
    api::{Api, Patch, PatchParams, Resource},
    core::NamespaceResourceScope,
};
use serde::{Serialize, de::DeserializeOwned};
use std::fmt::Debug;

pub trait Object<S> {
    /// Returns a mutable reference to the status object, initializing
    /// it with the default value if it does not exist.
    fn mut_status(&mut self) -> &mut S;
}

impl Object<BreakglassRequestStatus> for BreakglassRequest {
    fn mut_status(&mut self) -> &mut BreakglassRequestStatus {
        self.status.get_or_insert_with(Default::default)
    }
}

/// Patch the resource's status object with the provided function.
/// The function is passed a mutable reference to the status object,
/// which is to be mutated in-place. Move closures are supported.
pub async fn patch_status<S, T>(client: Client, instance: &T, f: impl FnOnce(&mut S)) -> Result<T, Error>
where
    <T as Resource>::DynamicType: Default,
    T: Clone
        + Resource
        + Object<S>
        + Serialize
        + DeserializeOwned
        + Debug
        + Resource<Scope = NamespaceResourceScope>,
{
    let patch = Patch::Json::<T>({
        let mut modified = instance.clone();
        f(modified.mut_status());
        json_patch::diff(
            &serde_json::to_value(instance).unwrap(),
            &serde_json::to_value(&modified).unwrap(),
        )
    });
    let name = instance.meta().name.as_deref().unwrap();
    let namespace = instance.meta().namespace.as_deref().unwrap();
    let api: Api<T> = Api::namespaced(client, namespace);
    api.patch_status(name, &PatchParams::apply(MANAGER_NAME), &patch)
        .await
}
