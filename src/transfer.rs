//! File transfer over the command channel.
//!
//! Files are copied with plain shell commands, so any backend can move
//! them: `printf` with octal escapes to write, a hex dump tool to read,
//! an md5 tool to verify and `ls -ld` for the permission bits. Executors
//! with a native copy (adb) use it instead of the command channel, but
//! verification is the same.
//!
//! Both directions go through a `.part` staging file that is renamed
//! into place only after the checksum matched, and removed otherwise.

use std::borrow::Cow;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::ShellError;
use crate::execution::{Command, ShellResult};
use crate::logging::log_oob;
use crate::shell::{Executor, Shell};
use crate::Result;

/// Bytes written per `printf` command. Keeps command lines well below
/// terminal line limits.
pub const CHUNK_SIZE: usize = 256;

const STAGING_SUFFIX: &str = ".part";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HashTool {
    Md5sum,
    Md5,
}

impl HashTool {
    fn command(self, quoted: &str) -> String {
        match self {
            Self::Md5sum => format!("md5sum {}", quoted),
            Self::Md5 => format!("md5 -q {}", quoted),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DumpTool {
    Xxd,
    Hexdump,
    Od,
}

impl DumpTool {
    fn command(self, quoted: &str) -> String {
        match self {
            Self::Xxd => format!("xxd -p {}", quoted),
            Self::Hexdump => format!("hexdump -v -e '/1 \"%02x\"' {}", quoted),
            Self::Od => format!("od -An -v -tx1 {}", quoted),
        }
    }
}

/// Remote tools found so far. Cleared whenever the remote end may have
/// changed (connect, reboot).
#[derive(Debug, Default)]
pub struct ToolCache {
    hash: Option<HashTool>,
    dump: Option<DumpTool>,
}

impl ToolCache {
    pub(crate) fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Permission bits from an `ls -l` style mode string such as
/// `-rwxr-x---` (a trailing ACL or xattr marker is accepted).
pub fn parse_mode(listing: &str) -> Option<u32> {
    let field = listing.split_whitespace().next()?;
    if !field.is_ascii() {
        return None;
    }
    let field = match field.len() {
        10 => field,
        11 if field.ends_with(['@', '+', '.']) => &field[..10],
        _ => return None,
    };
    let chars: Vec<char> = field.chars().collect();
    if !"-dlbcps".contains(chars[0]) {
        return None;
    }

    let mut mode = 0u32;
    for (group, triplet) in chars[1..].chunks(3).enumerate() {
        let shift = 6 - 3 * group as u32;
        match triplet[0] {
            'r' => mode |= 0o4 << shift,
            '-' => {}
            _ => return None,
        }
        match triplet[1] {
            'w' => mode |= 0o2 << shift,
            '-' => {}
            _ => return None,
        }
        let special = 0o4000 >> group;
        match (group, triplet[2]) {
            (_, 'x') => mode |= 0o1 << shift,
            (_, '-') => {}
            (0 | 1, 's') | (2, 't') => mode |= (0o1 << shift) | special,
            (0 | 1, 'S') | (2, 'T') => mode |= special,
            _ => return None,
        }
    }
    Some(mode)
}

/// `printf` format string writing `chunk` verbatim.
fn octal_escape(chunk: &[u8]) -> String {
    let mut out = String::with_capacity(chunk.len() * 4);
    for byte in chunk {
        let _ = write!(out, "\\{:03o}", byte);
    }
    out
}

fn md5_hex(bytes: &[u8]) -> String {
    format!("{:x}", md5::compute(bytes))
}

fn quote(path: &str) -> String {
    shell_escape::unix::escape(Cow::Borrowed(path)).into_owned()
}

fn staging_path(local: &Path) -> Result<PathBuf> {
    let name = local.file_name().ok_or_else(|| {
        ShellError::FileTransfer(format!("{} is not a file path", local.display()))
    })?;
    let mut staged = name.to_os_string();
    staged.push(STAGING_SUFFIX);
    Ok(local.with_file_name(staged))
}

fn verify(what: &str, expected: &str, bytes: &[u8]) -> Result<()> {
    let actual = md5_hex(bytes);
    if actual == expected {
        Ok(())
    } else {
        Err(ShellError::FileTransfer(format!(
            "checksum mismatch for {}: expected {}, got {}",
            what, expected, actual
        )))
    }
}

#[cfg(unix)]
fn local_mode(path: &Path) -> Result<u32> {
    use std::os::unix::fs::PermissionsExt;
    Ok(fs::metadata(path)?.permissions().mode() & 0o7777)
}

#[cfg(not(unix))]
fn local_mode(path: &Path) -> Result<u32> {
    fs::metadata(path)?;
    Ok(0o644)
}

#[cfg(unix)]
fn set_local_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_local_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

impl<E: Executor> Shell<E> {
    /// Copy `remote` to `local`, preserving permission bits.
    pub fn pull(&mut self, remote: &str, local: impl AsRef<Path>) -> Result<()> {
        let local = local.as_ref();
        log_oob(&format!("pulling {} -> {}", remote, local.display()));
        let quoted = quote(remote);

        let listing = self.query(format!("ls -ld {}", quoted))?;
        let mode = first_line(&listing)
            .and_then(|line| parse_mode(&line))
            .ok_or_else(|| {
                ShellError::FileTransfer(format!("cannot read permissions of {}", remote))
            })?;
        let expected = self.remote_md5(&quoted)?;

        let staging = staging_path(local)?;
        let outcome = self.fetch(remote, &quoted, &staging).and_then(|bytes| {
            verify(remote, &expected, &bytes)?;
            set_local_mode(&staging, mode)?;
            fs::rename(&staging, local)?;
            Ok(())
        });
        if outcome.is_err() {
            if let Err(e) = fs::remove_file(&staging) {
                debug!("removing {}: {}", staging.display(), e);
            }
        }
        outcome
    }

    /// Copy `local` to `remote`, preserving permission bits.
    pub fn push(&mut self, local: impl AsRef<Path>, remote: &str) -> Result<()> {
        let local = local.as_ref();
        log_oob(&format!("pushing {} -> {}", local.display(), remote));
        let bytes = fs::read(local)?;
        let mode = local_mode(local)?;

        let staging = format!("{}{}", remote, STAGING_SUFFIX);
        let quoted_staging = quote(&staging);
        let outcome = self.push_staged(local, &bytes, mode, &staging, &quoted_staging, remote);
        if outcome.is_err() {
            if let Err(e) = self.query(format!("rm -f {}", quoted_staging)) {
                warn!("could not remove {}: {}", staging, e);
            }
        }
        outcome
    }

    fn push_staged(
        &mut self,
        local: &Path,
        bytes: &[u8],
        mode: u32,
        staging: &str,
        quoted_staging: &str,
        remote: &str,
    ) -> Result<()> {
        match self.executor_mut().native_transfer() {
            Some(native) => native.upload(local, staging)?,
            None => self.write_remote(quoted_staging, bytes)?,
        }
        let actual = self.remote_md5(quoted_staging)?;
        let expected = md5_hex(bytes);
        if actual != expected {
            return Err(ShellError::FileTransfer(format!(
                "checksum mismatch for {}: expected {}, got {}",
                remote, expected, actual
            )));
        }
        self.query(format!("chmod {:o} {}", mode, quoted_staging))?;
        self.query(format!("mv -f {} {}", quoted_staging, quote(remote)))?;
        Ok(())
    }

    fn fetch(&mut self, remote: &str, quoted: &str, staging: &Path) -> Result<Vec<u8>> {
        if let Some(native) = self.executor_mut().native_transfer() {
            native.download(remote, staging)?;
            return Ok(fs::read(staging)?);
        }
        let bytes = self.remote_bytes(quoted)?;
        fs::write(staging, &bytes)?;
        Ok(bytes)
    }

    /// Blocking, exit-code-checked helper command.
    fn query(&mut self, command: String) -> Result<ShellResult> {
        self.run(Command::new(command).check_xc(true).check_err(false).wait(true))
    }

    fn has_tool(&mut self, name: &str) -> Result<bool> {
        let probe = Command::new(format!("command -v {} >/dev/null 2>&1", name))
            .check_xc(false)
            .check_err(false)
            .wait(true);
        Ok(self.run(probe)?.success())
    }

    fn hash_tool(&mut self) -> Result<HashTool> {
        if let Some(tool) = self.tools.hash {
            return Ok(tool);
        }
        let tool = if self.has_tool("md5sum")? {
            HashTool::Md5sum
        } else if self.has_tool("md5")? {
            HashTool::Md5
        } else {
            return Err(ShellError::FileTransfer("no md5 tool found".into()));
        };
        debug!("using {:?} for checksums", tool);
        self.tools.hash = Some(tool);
        Ok(tool)
    }

    fn dump_tool(&mut self) -> Result<DumpTool> {
        if let Some(tool) = self.tools.dump {
            return Ok(tool);
        }
        let tool = if self.has_tool("xxd")? {
            DumpTool::Xxd
        } else if self.has_tool("hexdump")? {
            DumpTool::Hexdump
        } else if self.has_tool("od")? {
            DumpTool::Od
        } else {
            return Err(ShellError::FileTransfer("no hex dump tool found".into()));
        };
        debug!("using {:?} for reading files", tool);
        self.tools.dump = Some(tool);
        Ok(tool)
    }

    fn remote_md5(&mut self, quoted: &str) -> Result<String> {
        let tool = self.hash_tool()?;
        let result = self.query(tool.command(quoted))?;
        let line = first_line(&result).unwrap_or_default();
        match line.split_whitespace().next() {
            Some(sum) if sum.len() == 32 && sum.chars().all(|c| c.is_ascii_hexdigit()) => {
                Ok(sum.to_ascii_lowercase())
            }
            _ => Err(ShellError::FileTransfer(format!(
                "unexpected checksum output {:?}",
                line
            ))),
        }
    }

    fn remote_bytes(&mut self, quoted: &str) -> Result<Vec<u8>> {
        let tool = self.dump_tool()?;
        let result = self.query(tool.command(quoted))?;
        let digits: String = result
            .stdout()?
            .iter()
            .flat_map(|line| line.chars())
            .filter(|c| !c.is_whitespace())
            .collect();
        hex::decode(&digits)
            .map_err(|e| ShellError::FileTransfer(format!("bad hex dump: {}", e)))
    }

    fn write_remote(&mut self, quoted: &str, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            self.query(format!(": > {}", quoted))?;
            return Ok(());
        }
        for (i, chunk) in bytes.chunks(CHUNK_SIZE).enumerate() {
            let redirect = if i == 0 { ">" } else { ">>" };
            self.query(format!(
                "printf '{}' {} {}",
                octal_escape(chunk),
                redirect,
                quoted
            ))?;
        }
        Ok(())
    }
}

fn first_line(result: &ShellResult) -> Option<String> {
    result.stdout().ok()?.into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mode() {
        assert_eq!(parse_mode("-rw-r--r-- 1 root root 0 Jan 1 f"), Some(0o644));
        assert_eq!(parse_mode("-rwxr-x--- 1 a b 3 x"), Some(0o750));
        assert_eq!(parse_mode("drwxrwxrwx"), Some(0o777));
        assert_eq!(parse_mode("----------"), Some(0));
    }

    #[test]
    fn test_parse_mode_special_bits() {
        assert_eq!(parse_mode("-rwsr-xr-x"), Some(0o4755));
        assert_eq!(parse_mode("-rwxr-Sr--"), Some(0o2744));
        assert_eq!(parse_mode("drwxrwxrwt"), Some(0o1777));
        assert_eq!(parse_mode("-rw-r--r-T"), Some(0o1644));
    }

    #[test]
    fn test_parse_mode_with_marker() {
        assert_eq!(parse_mode("-rw-r--r--@ 1 u staff 0 f"), Some(0o644));
        assert_eq!(parse_mode("-rw-r--r--+"), Some(0o644));
    }

    #[test]
    fn test_parse_mode_rejects_garbage() {
        assert_eq!(parse_mode(""), None);
        assert_eq!(parse_mode("ls: cannot access"), None);
        assert_eq!(parse_mode("-rw-r--r"), None);
        assert_eq!(parse_mode("xrw-r--r--"), None);
        assert_eq!(parse_mode("-rq-r--r--"), None);
    }

    #[test]
    fn test_octal_escape() {
        assert_eq!(octal_escape(b"A\n"), "\\101\\012");
        assert_eq!(octal_escape(&[0, 255, b'\'']), "\\000\\377\\047");
    }

    #[test]
    fn test_md5_hex() {
        assert_eq!(md5_hex(b""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(md5_hex(b"abc"), "900150983cd24fb0d6963f7d28e17f72");
    }

    #[test]
    fn test_staging_path() {
        assert_eq!(
            staging_path(Path::new("/tmp/out.bin")).unwrap(),
            PathBuf::from("/tmp/out.bin.part")
        );
        assert!(staging_path(Path::new("/")).is_err());
    }

    #[test]
    fn test_verify() {
        assert!(verify("f", "900150983cd24fb0d6963f7d28e17f72", b"abc").is_ok());
        assert!(matches!(
            verify("f", "900150983cd24fb0d6963f7d28e17f72", b"abd"),
            Err(ShellError::FileTransfer(_))
        ));
    }

    #[test]
    fn test_tool_cache_reset() {
        let mut cache = ToolCache {
            hash: Some(HashTool::Md5),
            dump: Some(DumpTool::Od),
        };
        cache.reset();
        assert!(cache.hash.is_none());
        assert!(cache.dump.is_none());
    }

    #[test]
    fn test_tool_commands() {
        assert_eq!(HashTool::Md5sum.command("'a b'"), "md5sum 'a b'");
        assert_eq!(HashTool::Md5.command("f"), "md5 -q f");
        assert_eq!(DumpTool::Od.command("f"), "od -An -v -tx1 f");
    }
}
