//! Video generation providers.

mod fal;
pub mod google_auth;
mod open_sora;
mod veo;

pub use fal::{FalProvider, FalProviderBuilder};
pub use google_auth::{ServiceAccountKey, ServiceAccountTokenSource};
pub use open_sora::{OpenSoraProvider, OpenSoraProviderBuilder};
pub use veo::{VeoBackend, VeoProvider, VeoProviderBuilder, VertexAuth};
