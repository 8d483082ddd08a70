/// `status.message` used while a resource is waiting on an external approver.
pub const WAITING_FOR_APPROVAL: &str = "Awaiting approval before scheduling can proceed.";

/// `status.message` used once a deletion's owned RBAC objects have been removed.
pub const CLEANUP_COMPLETED: &str = "Owned RBAC objects were removed; finalizer released.";
