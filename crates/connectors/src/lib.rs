//! Authenticated access to the CRM and Finance upstreams.

pub mod crm;
pub mod finance;
mod http;
pub mod session;

pub use crm::CrmAuthenticator;
pub use finance::{hash_password, FinanceAuthenticator};
pub use session::{AuthScheme, Authenticator, SessionCache, SessionCredential};
