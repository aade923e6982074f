mod client;
mod response;

pub mod prelude {
    pub use crate::client::{HttpClientInstrumented, DEFAULT_REQUEST_TIMEOUT};
    pub use crate::response::HttpResponse;

    // Re-exported so that scenarios do not need their own dependency on reqwest and url.
    pub use reqwest::Method;
    pub use url::Url;
}
