mod identity;
mod service;
mod session;

pub use identity::IdentityProxy;
pub use service::AuthServiceChannel;
pub use session::SessionProxy;
