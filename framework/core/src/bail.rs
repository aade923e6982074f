/// Return this error from a scenario function to indicate that the virtual user is bailing.
///
/// This should be used when a VU hits an error that is fatal to that VU but not to the run. For
/// example, if a session the VU depends on can no longer be used then the VU may bail while the
/// other VUs carry on. The slot of a bailed VU is not refilled for the rest of the run.
#[derive(derive_more::Error, derive_more::Display, Debug)]
pub struct VuBailError {
    msg: String,
}

impl VuBailError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self { msg: msg.into() }
    }
}

impl Default for VuBailError {
    fn default() -> Self {
        Self {
            msg: "Virtual user is bailing".to_string(),
        }
    }
}
