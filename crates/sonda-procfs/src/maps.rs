//! Parser of `/proc/<pid>/maps` files.
//!
//! Each line has the following layout:
//!
//! ```text
//! address           perms offset  dev   inode       pathname
//! 00400000-00452000 r-xp 00000000 08:02 173521      /usr/bin/dbus-daemon
//! ```

use std::ops::Range;

/// Entry of a `maps` file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MapsEntry<'a> {
    pub addr_range: Range<u64>,
    pub executable: bool,
    pub offset: u64,
    pub pathname: &'a str,
}

impl MapsEntry<'_> {
    /// Returns whether the entry is backed by a file on disk.
    ///
    /// Pseudo paths such as `[vdso]` or `[heap]` are not.
    pub fn is_file_backed(&self) -> bool {
        self.pathname.starts_with('/')
    }
}

/// Parses the content of a `maps` file.
pub(crate) fn parse(content: &str) -> crate::Result<Vec<MapsEntry<'_>>> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            parse_line(line).ok_or_else(|| crate::Error::MalformedMapsLine {
                line: i + 1,
                content: line.to_owned(),
            })
        })
        .collect()
}

fn parse_line(line: &str) -> Option<MapsEntry<'_>> {
    let mut fields = line.splitn(6, ' ');

    let (start, end) = fields.next()?.split_once('-')?;
    let perms = fields.next()?;
    let offset = fields.next()?;
    let _dev = fields.next()?;
    let _inode = fields.next()?;
    let pathname = fields.next().unwrap_or_default().trim();

    let start = u64::from_str_radix(start, 16).ok()?;
    let end = u64::from_str_radix(end, 16).ok()?;

    if perms.len() != 4 || end < start {
        return None;
    }

    Some(MapsEntry {
        addr_range: start..end,
        executable: perms.as_bytes()[2] == b'x',
        offset: u64::from_str_radix(offset, 16).ok()?,
        pathname,
    })
}
