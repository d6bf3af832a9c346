/// Per-caller execution context.
///
/// Every log operation borrows an `Env` for its scratch space instead of
/// reaching for thread-local buffers. Create one per thread and reuse it.
#[derive(Debug, Default)]
pub struct Env {
    scratch: Vec<u8>,
}

impl Env {
    pub fn new() -> Self {
        Env {
            scratch: Vec::new(),
        }
    }

    /// Zeroed scratch buffer of exactly `len` bytes
    pub(crate) fn chunk(&mut self, len: usize) -> &mut [u8] {
        self.scratch.clear();
        self.scratch.resize(len, 0);
        &mut self.scratch[..]
    }
}
