//! # perim-core
//!
//! Domain operations of the data perimeter tool, independent of transport.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  policy::PolicyManager   resources::         │
//! │  (lookup, toggle,        ResourceManager     │
//! │   create/delete/modify)  auth::login         │
//! ├──────────────────────────────────────────────┤
//! │  backend: OrganizationsApi / ObjectStore /   │
//! │           IdentityProvider / BackendFactory  │
//! ├──────────────────────────────────────────────┤
//! │  SdkBackend → perim-aws clients              │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! Requests carry a [`CredentialBundle`] built once at the boundary; every
//! operation returns a [`PerimeterResult`].

pub mod auth;
pub mod backend;
pub mod credentials;
pub mod error;
pub mod policy;
pub mod resources;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use auth::{login, LoginRequest, LoginResult};
pub use backend::{BackendFactory, IdentityProvider, ObjectStore, OrganizationsApi, SdkBackend, StoredObject};
pub use credentials::{CredentialBundle, CredentialTriple, Profile};
pub use error::{PerimeterError, PerimeterErrorKind, PerimeterResult};
pub use policy::{AttachmentStatus, PerimeterTemplate, PolicyDescription, PolicyManager, PolicyParams};
pub use resources::{BucketSummary, ComplianceReport, Resource, ResourceKind, ResourceManager, UploadedResource};
