//! Wire/API shape consumed by adapters: `auth.service/v1alpha1` objects.

mod meta;
mod rbac;
mod user;

pub use self::meta::{ObjectMeta, TypeMeta, API_VERSION};
pub use self::rbac::{PolicyRule, Role, RoleBinding, RoleRef, Subject};
pub use self::user::{User, UserList, UserSpec, UserStatus};
