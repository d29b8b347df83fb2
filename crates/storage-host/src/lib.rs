// In-memory emulation of the device storage providers

pub mod device;
pub mod documents;
pub mod grants;
pub mod media;

pub use device::{Device, DeviceSnapshot};
pub use documents::MemoryDocumentProvider;
pub use grants::MemoryGrantTable;
pub use media::MemoryMediaStore;

use std::time::{SystemTime, UNIX_EPOCH};

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Pick `name`, or `stem (n).ext` for the first n where `taken` is false.
/// This is the collision policy of the platform providers, which rename rather than fail.
pub(crate) fn unique_display_name(name: &str, taken: impl Fn(&str) -> bool) -> String {
    if !taken(name) {
        return name.to_string();
    }
    let (stem, ext) = match name.rfind('.') {
        Some(i) if i > 0 => (&name[..i], &name[i..]),
        _ => (name, ""),
    };
    let mut n = 1u64;
    loop {
        let candidate = format!("{} ({}){}", stem, n, ext);
        if !taken(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_display_name() {
        assert_eq!(unique_display_name("a.txt", |_| false), "a.txt");
        assert_eq!(unique_display_name("a.txt", |n| n == "a.txt"), "a (1).txt");
        assert_eq!(
            unique_display_name("a.txt", |n| n == "a.txt" || n == "a (1).txt"),
            "a (2).txt"
        );
        assert_eq!(unique_display_name("dir", |n| n == "dir"), "dir (1)");
        assert_eq!(unique_display_name(".hidden", |n| n == ".hidden"), ".hidden (1)");
    }
}
