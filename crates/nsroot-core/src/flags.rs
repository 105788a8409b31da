//! Human-readable rendering of `mount(2)` flag masks.
//!
//! Rendered text lists each known flag by its symbolic name followed by
//! `|`, then the remaining unknown bits as a hexadecimal literal, e.g.
//! `MS_RDONLY|MS_BIND|0`. The same text parses back into the flag mask.

use std::path::Path;

use libc::c_ulong;
use nix::mount::MsFlags;
use nsroot_common::constants::FLAGS_TEXT_MAX;
use nsroot_common::error::{NsRootError, Result};

const KNOWN_FLAGS: [(c_ulong, &str); 24] = [
    (libc::MS_RDONLY, "MS_RDONLY"),
    (libc::MS_NOSUID, "MS_NOSUID"),
    (libc::MS_NODEV, "MS_NODEV"),
    (libc::MS_NOEXEC, "MS_NOEXEC"),
    (libc::MS_SYNCHRONOUS, "MS_SYNCHRONOUS"),
    (libc::MS_REMOUNT, "MS_REMOUNT"),
    (libc::MS_MANDLOCK, "MS_MANDLOCK"),
    (libc::MS_DIRSYNC, "MS_DIRSYNC"),
    (libc::MS_NOATIME, "MS_NOATIME"),
    (libc::MS_NODIRATIME, "MS_NODIRATIME"),
    (libc::MS_BIND, "MS_BIND"),
    (libc::MS_MOVE, "MS_MOVE"),
    (libc::MS_REC, "MS_REC"),
    (libc::MS_SILENT, "MS_SILENT"),
    (libc::MS_POSIXACL, "MS_POSIXACL"),
    (libc::MS_UNBINDABLE, "MS_UNBINDABLE"),
    (libc::MS_PRIVATE, "MS_PRIVATE"),
    (libc::MS_SLAVE, "MS_SLAVE"),
    (libc::MS_SHARED, "MS_SHARED"),
    (libc::MS_RELATIME, "MS_RELATIME"),
    (libc::MS_KERNMOUNT, "MS_KERNMOUNT"),
    (libc::MS_I_VERSION, "MS_I_VERSION"),
    (libc::MS_STRICTATIME, "MS_STRICTATIME"),
    (libc::MS_LAZYTIME, "MS_LAZYTIME"),
];

const fn known_mask() -> c_ulong {
    let mut mask = 0;
    let mut i = 0;
    while i < KNOWN_FLAGS.len() {
        mask |= KNOWN_FLAGS[i].0;
        i += 1;
    }
    mask
}

/// Renders a raw flag mask.
///
/// Known bits are listed in a fixed order, so the output is deterministic.
/// The result never exceeds [`FLAGS_TEXT_MAX`] bytes; anything past that
/// is dropped.
pub fn flags_to_text(flags: c_ulong) -> String {
    let mut text = String::new();
    for (bit, name) in KNOWN_FLAGS {
        if flags & bit != 0 {
            push_bounded(&mut text, name);
            push_bounded(&mut text, "|");
        }
    }
    let unknown = flags & !known_mask();
    if unknown == 0 {
        push_bounded(&mut text, "0");
    } else {
        push_bounded(&mut text, &format!("{unknown:#x}"));
    }
    text
}

/// Renders a typed flag set, keeping bits `nix` does not name.
pub fn describe(flags: MsFlags) -> String {
    flags_to_text(flags.bits())
}

fn push_bounded(text: &mut String, piece: &str) {
    let room = FLAGS_TEXT_MAX.saturating_sub(text.len());
    if piece.len() <= room {
        text.push_str(piece);
    } else if let Some(head) = piece.get(..room) {
        text.push_str(head);
    }
}

fn flag_by_name(name: &str) -> Option<c_ulong> {
    KNOWN_FLAGS
        .iter()
        .find(|(_, known)| *known == name)
        .map(|(bit, _)| *bit)
}

/// Parses text produced by [`flags_to_text`] back into a raw mask.
///
/// Accepts `|`-separated symbolic names and hexadecimal literals.
///
/// # Errors
///
/// Returns [`NsRootError::Config`] on an unknown token.
pub fn parse_flags_text(text: &str) -> Result<c_ulong> {
    text.split('|')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .try_fold(0, |mask: c_ulong, token| -> Result<c_ulong> {
            let bits = if let Some(bit) = flag_by_name(token) {
                bit
            } else if token == "0" {
                0
            } else if let Some(hex) = token.strip_prefix("0x") {
                c_ulong::from_str_radix(hex, 16).map_err(|e| NsRootError::Config {
                    message: format!("invalid flag literal '{token}': {e}"),
                })?
            } else {
                return Err(unknown_flag(token));
            };
            Ok(mask | bits)
        })
}

/// Parses a list of symbolic flag names as written in configuration files.
///
/// # Errors
///
/// Returns [`NsRootError::Config`] naming the first unknown flag.
pub fn parse_flag_names<S: AsRef<str>>(names: &[S]) -> Result<MsFlags> {
    names.iter().try_fold(MsFlags::empty(), |flags, name| -> Result<MsFlags> {
        let name = name.as_ref().trim();
        let bit = flag_by_name(name).ok_or_else(|| unknown_flag(name))?;
        Ok(flags | MsFlags::from_bits_retain(bit))
    })
}

fn unknown_flag(name: &str) -> NsRootError {
    NsRootError::Config {
        message: format!("unknown mount flag '{name}'"),
    }
}

/// Reports whether `path` should be treated as a directory mount target.
///
/// An absent path stands for a virtual filesystem (tmpfs, proc) and counts
/// as a directory. Stat failures are logged at debug level and count as
/// "not a directory".
pub fn is_directory_hint(path: Option<&Path>) -> bool {
    let Some(path) = path else {
        return true;
    };
    match std::fs::metadata(path) {
        Ok(meta) => meta.is_dir(),
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "stat failed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn empty_mask_renders_zero() {
        assert_eq!(flags_to_text(0), "0");
    }

    #[test]
    fn known_flags_render_in_table_order() {
        let flags = libc::MS_REC | libc::MS_BIND | libc::MS_RDONLY;
        assert_eq!(flags_to_text(flags), "MS_RDONLY|MS_BIND|MS_REC|0");
    }

    #[test]
    fn unknown_bits_render_as_hex_suffix() {
        let unknown: c_ulong = 1 << 30;
        assert_eq!(
            flags_to_text(libc::MS_NOSUID | unknown),
            "MS_NOSUID|0x40000000"
        );
    }

    #[test]
    fn every_known_flag_has_a_distinct_bit() {
        let total = KNOWN_FLAGS.iter().fold(0, |acc, (bit, _)| {
            assert_eq!(acc & bit, 0, "duplicate bit {bit:#x}");
            acc | bit
        });
        assert_eq!(total, known_mask());
    }

    #[test]
    fn text_round_trips_through_parser() {
        let samples: [c_ulong; 4] = [
            0,
            libc::MS_BIND | libc::MS_REC,
            libc::MS_RDONLY | libc::MS_NODEV | libc::MS_LAZYTIME | (1 << 31),
            known_mask(),
        ];
        for flags in samples {
            let text = flags_to_text(flags);
            assert_eq!(parse_flags_text(&text).unwrap(), flags, "text: {text}");
        }
    }

    #[test]
    fn parser_rejects_unknown_names() {
        assert!(parse_flags_text("MS_BIND|MS_BOGUS|0").is_err());
        assert!(parse_flags_text("0xzz").is_err());
    }

    #[test]
    fn flag_names_parse_into_typed_flags() {
        let flags = parse_flag_names(&["MS_NOATIME", " MS_NODEV "]).unwrap();
        assert_eq!(flags, MsFlags::MS_NOATIME | MsFlags::MS_NODEV);
        assert!(parse_flag_names(&["noatime"]).is_err());
        assert_eq!(parse_flag_names::<&str>(&[]).unwrap(), MsFlags::empty());
    }

    #[test]
    fn describe_matches_raw_rendering() {
        let flags = MsFlags::MS_BIND | MsFlags::MS_RDONLY;
        assert_eq!(describe(flags), flags_to_text(flags.bits()));
    }

    #[test]
    fn output_is_bounded() {
        let mut text = "x".repeat(FLAGS_TEXT_MAX - 3);
        push_bounded(&mut text, "MS_RDONLY");
        assert_eq!(text.len(), FLAGS_TEXT_MAX);
        assert!(text.ends_with("xMS_"));
        push_bounded(&mut text, "|");
        assert_eq!(text.len(), FLAGS_TEXT_MAX);
    }

    #[test]
    fn directory_hint_covers_absent_dir_file_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("file");
        std::fs::write(&file, b"x").unwrap();

        assert!(is_directory_hint(None));
        assert!(is_directory_hint(Some(dir.path())));
        assert!(!is_directory_hint(Some(&file)));
        assert!(!is_directory_hint(Some(&dir.path().join("missing"))));
    }
}
