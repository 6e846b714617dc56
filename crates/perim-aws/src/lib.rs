//! # perim-aws – AWS wire layer for the data perimeter
//!
//! Thin, typed clients for the handful of AWS APIs the perimeter tool
//! drives, with real SigV4 signing and no SDK dependency.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │  Service clients                                 │
//! │  ├── OrganizationsClient  (organizations.rs)     │
//! │  ├── S3Client             (s3.rs)                │
//! │  ├── CognitoIdpClient     (cognito.rs)           │
//! │  └── CognitoIdentityClient (cognito.rs)          │
//! ├──────────────────────────────────────────────────┤
//! │  AwsClient  (client.rs)                          │
//! │  ├── json_request   (Organizations, Cognito)     │
//! │  ├── rest_request   (S3)                         │
//! │  └── presign        (S3 GET URLs)                │
//! ├──────────────────────────────────────────────────┤
//! │  SigV4Signer  (signing.rs) · SrpClient (srp.rs)  │
//! │  PaginatedResponse / drain_pages (pagination.rs) │
//! └──────────────────────────────────────────────────┘
//! ```
//!
//! ## API Protocols
//!
//! | Protocol    | Services                                 |
//! |-------------|------------------------------------------|
//! | JSON 1.1    | Organizations, Cognito user/identity pool |
//! | REST + XML  | S3                                       |

// ── Sub-modules ─────────────────────────────────────────────────────────

pub mod error;
pub mod config;
pub mod signing;
pub mod client;
pub mod pagination;

// Service clients
pub mod organizations;
pub mod s3;
pub mod cognito;
pub mod srp;

// ── Re-exports for ergonomic access ─────────────────────────────────────

pub use client::AwsClient;
pub use config::{AwsCredentials, AwsRegion, RetryConfig, RetryMode, AWS_REGIONS};
pub use error::{AwsError, AwsResult};
pub use pagination::{drain_pages, PaginatedResponse};
