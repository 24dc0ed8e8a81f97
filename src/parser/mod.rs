use crate::git::path_from_bytes;
use crate::{Fragment, FragmentId, FragmentStatus};
use sha2::{Digest, Sha256};
use std::borrow::Cow;
use std::path::{Path, PathBuf};

/// Split raw unified diff output into independently applicable fragments.
///
/// Every `@@` block becomes one `Fragment` whose `patch` repeats the file
/// header, so each fragment is a complete patch on its own. Lines are kept
/// byte for byte (CRLF endings and non-UTF-8 content included). Ids are
/// assigned sequentially from 1 in diff order. Binary files and header-only
/// changes (pure renames, mode changes) produce no fragments.
pub fn parse_diff(input: impl AsRef<[u8]>) -> Vec<Fragment> {
    let lines: Vec<&[u8]> = input.as_ref().split_inclusive(|&b| b == b'\n').collect();
    let mut fragments = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        if !lines[i].starts_with(b"diff --git ") {
            i += 1;
            continue;
        }

        let mut header = vec![lines[i]];
        let mut path: Option<PathBuf> = None;
        let mut is_binary = false;
        i += 1;

        // Header runs up to the "+++" line. A new "diff --git" before that
        // means this file has no textual hunks.
        while i < lines.len() {
            let current = lines[i];
            if current.starts_with(b"diff --git ") {
                break;
            }
            if current.starts_with(b"Binary files ") || current.starts_with(b"GIT binary patch") {
                is_binary = true;
                i += 1;
                break;
            }
            header.push(current);
            i += 1;
            if let Some(name) = current.strip_prefix(b"+++ ") {
                path = resolve_path(name, &header);
                break;
            }
        }

        if is_binary {
            continue;
        }
        let Some(path) = path else { continue };
        let file_header = header.concat();

        while i < lines.len() {
            let current = lines[i];
            if current.starts_with(b"diff --git ") {
                break;
            }
            if current.starts_with(b"@@ ") {
                let id = FragmentId(fragments.len() + 1);
                match parse_hunk(&lines, &mut i, id, &path, &file_header) {
                    Some(fragment) => fragments.push(fragment),
                    None => i += 1,
                }
            } else {
                i += 1;
            }
        }
    }

    fragments
}

/// Pick the file path from a `+++` line, falling back to the `---` line for deletions.
fn resolve_path(plus: &[u8], header: &[&[u8]]) -> Option<PathBuf> {
    let plus = file_name(plus);
    if &plus[..] != b"/dev/null" {
        return Some(path_from_bytes(plus.strip_prefix(b"b/").unwrap_or(&plus[..])));
    }

    let minus = header.iter().rev().find_map(|l| l.strip_prefix(b"--- "))?;
    let minus = file_name(minus);
    if &minus[..] == b"/dev/null" {
        return None;
    }
    Some(path_from_bytes(minus.strip_prefix(b"a/").unwrap_or(&minus[..])))
}

/// The name on a `---`/`+++` line without its line ending, without the
/// tab-separated timestamp `diff -u` appends, and with git's C-style
/// quoting undone.
fn file_name(raw: &[u8]) -> Cow<'_, [u8]> {
    let raw = trim_eol(raw);
    let raw = raw.split(|&b| b == b'\t').next().unwrap_or(raw).trim_ascii_end();
    match raw.strip_prefix(b"\"").and_then(|r| r.strip_suffix(b"\"")) {
        Some(quoted) => Cow::Owned(unquote(quoted)),
        None => Cow::Borrowed(raw),
    }
}

/// Reverse git's quoting of unusual path bytes (`\t`, `\"`, `\303\251`).
fn unquote(quoted: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(quoted.len());
    let mut bytes = quoted.iter().copied().peekable();
    while let Some(b) = bytes.next() {
        if b != b'\\' {
            out.push(b);
            continue;
        }
        match bytes.next() {
            Some(b'a') => out.push(0x07),
            Some(b'b') => out.push(0x08),
            Some(b'f') => out.push(0x0c),
            Some(b'n') => out.push(b'\n'),
            Some(b'r') => out.push(b'\r'),
            Some(b't') => out.push(b'\t'),
            Some(b'v') => out.push(0x0b),
            Some(digit @ b'0'..=b'7') => {
                let mut value = digit - b'0';
                for _ in 0..2 {
                    match bytes.peek() {
                        Some(&next @ b'0'..=b'7') => {
                            value = value.wrapping_mul(8).wrapping_add(next - b'0');
                            bytes.next();
                        }
                        _ => break,
                    }
                }
                out.push(value);
            }
            Some(other) => out.push(other),
            None => out.push(b'\\'),
        }
    }
    out
}

fn trim_eol(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Parse a single hunk starting at the @@ line, consuming exactly its body.
fn parse_hunk(
    lines: &[&[u8]],
    i: &mut usize,
    id: FragmentId,
    path: &Path,
    file_header: &[u8],
) -> Option<Fragment> {
    let line = lines[*i];

    // @@ -old_start,old_count +new_start,new_count @@ [context]
    let rest = trim_eol(line).strip_prefix(b"@@ ")?;
    let end = rest.windows(3).position(|w| w == b" @@")?;
    let ranges = std::str::from_utf8(&rest[..end]).ok()?;
    let mut parts = ranges.split(' ');
    let (old_start, old_count) = parse_range(parts.next()?.strip_prefix('-')?);
    let (new_start, new_count) = parse_range(parts.next()?.strip_prefix('+')?);

    let mut patch = file_header.to_vec();
    patch.extend_from_slice(line);
    let mut old_left = old_count;
    let mut new_left = new_count;
    *i += 1;

    while *i < lines.len() {
        let current = lines[*i];
        if current.starts_with(b"\\") {
            // "\ No newline at end of file" belongs to the preceding line.
            patch.extend_from_slice(current);
            *i += 1;
            continue;
        }
        if (old_left == 0 && new_left == 0)
            || current.starts_with(b"@@")
            || current.starts_with(b"diff --git ")
        {
            break;
        }
        match current.first() {
            Some(b'+') => new_left = new_left.saturating_sub(1),
            Some(b'-') => old_left = old_left.saturating_sub(1),
            // An empty context line may have lost its leading space.
            Some(b' ' | b'\n' | b'\r') | None => {
                old_left = old_left.saturating_sub(1);
                new_left = new_left.saturating_sub(1);
            }
            _ => break,
        }
        patch.extend_from_slice(current);
        *i += 1;
    }
    if !patch.ends_with(b"\n") {
        patch.push(b'\n');
    }

    let content_hash = compute_hash(&patch);

    Some(Fragment {
        id,
        file_path: path.to_path_buf(),
        old_start,
        old_count,
        new_start,
        new_count,
        patch,
        content_hash,
        status: FragmentStatus::Unassigned,
    })
}

/// Parse a range like "start,count" or "start" (count defaults to 1).
fn parse_range(s: &str) -> (u32, u32) {
    match s.split_once(',') {
        Some((start, count)) => (start.parse().unwrap_or(0), count.parse().unwrap_or(0)),
        None => (s.parse().unwrap_or(0), 1),
    }
}

/// SHA-256 of a fragment's patch bytes, hex encoded.
pub fn compute_hash(content: impl AsRef<[u8]>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_ref());
    format!("{:x}", hasher.finalize())
}
