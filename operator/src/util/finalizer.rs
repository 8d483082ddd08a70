use kube::{
    Client, Resource,
    api::{Api, Patch, PatchParams},
    core::NamespaceResourceScope,
};
use serde::{Serialize, de::DeserializeOwned};
use std::fmt::Debug;

use super::{Error, MANAGER_NAME};

pub const FINALIZER_NAME: &str = "breakglass.dev/finalizer";

pub fn has_finalizer<T: Resource>(instance: &T) -> bool {
    instance
        .meta()
        .finalizers
        .as_ref()
        .is_some_and(|fs| fs.iter().any(|f| f == FINALIZER_NAME))
}

pub fn needs_finalizer<T: Resource>(instance: &T) -> bool {
    instance.meta().deletion_timestamp.is_none() && !has_finalizer(instance)
}

/// Adds [`FINALIZER_NAME`] to `instance`'s finalizer list, persisting the change.
pub async fn add<T>(client: Client, instance: &T) -> Result<T, Error>
where
    <T as Resource>::DynamicType: Default,
    T: Clone + Resource + Serialize + DeserializeOwned + Debug + Resource<Scope = NamespaceResourceScope>,
{
    let mut modified = instance.clone();
    modified
        .meta_mut()
        .finalizers
        .get_or_insert_with(Vec::new)
        .push(FINALIZER_NAME.to_string());
    patch_meta(client, instance, modified).await
}

/// Removes [`FINALIZER_NAME`] from `instance`'s finalizer list, persisting the change.
pub async fn delete<T>(client: Client, instance: &T) -> Result<T, Error>
where
    <T as Resource>::DynamicType: Default,
    T: Clone + Resource + Serialize + DeserializeOwned + Debug + Resource<Scope = NamespaceResourceScope>,
{
    let mut modified = instance.clone();
    if let Some(finalizers) = modified.meta_mut().finalizers.as_mut() {
        finalizers.retain(|f| f != FINALIZER_NAME);
    }
    patch_meta(client, instance, modified).await
}

async fn patch_meta<T>(client: Client, instance: &T, modified: T) -> Result<T, Error>
where
    <T as Resource>::DynamicType: Default,
    T: Clone + Resource + Serialize + DeserializeOwned + Debug + Resource<Scope = NamespaceResourceScope>,
{
    let patch = Patch::Json::<T>(json_patch::diff(
        &serde_json::to_value(instance)?,
        &serde_json::to_value(&modified)?,
    ));
    let name = instance.meta().name.as_deref().unwrap();
    let namespace = instance.meta().namespace.as_deref().unwrap();
    let api: Api<T> = Api::namespaced(client, namespace);
    Ok(api.patch(name, &PatchParams::apply(MANAGER_NAME), &patch).await?)
}
