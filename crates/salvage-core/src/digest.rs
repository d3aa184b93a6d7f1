/// Optional SHA-256 of the bytes written for a file
use sha2::{Digest, Sha256};

pub struct ContentDigest(Option<Sha256>);

impl ContentDigest {
    pub fn new(enabled: bool) -> Self {
        Self(enabled.then(Sha256::new))
    }

    pub fn update(&mut self, bytes: &[u8]) {
        if let Some(hasher) = self.0.as_mut() {
            hasher.update(bytes);
        }
    }

    /// Lowercase hex digest, or `None` when disabled
    pub fn finish(self) -> Option<String> {
        self.0.map(|hasher| format!("{:x}", hasher.finalize()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digest() {
        let mut digest = ContentDigest::new(true);
        digest.update(b"ab");
        digest.update(b"c");
        assert_eq!(
            digest.finish().as_deref(),
            Some("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")
        );
    }

    #[test]
    fn test_disabled_digest() {
        let mut digest = ContentDigest::new(false);
        digest.update(b"abc");
        assert_eq!(digest.finish(), None);
    }
}
