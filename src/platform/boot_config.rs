// Boot loader configuration patching
//
// An unrecoverable erase failure must survive a power cycle. The flag is
// appended to every `kernel` line of the boot loader config, so the next boot
// exposes it as a kernel parameter (and thus in the init environment).

use std::fs;
use std::io::Write;
use std::path::Path;

/// Append ` key=value` to every line whose trimmed text starts with `kernel`.
///
/// Lines that already carry the flag are left alone; line endings are kept.
pub fn patch_kernel_lines(contents: &str, key: &str, value: &str) -> String {
    let flag = format!("{}={}", key, value);
    let mut patched = String::with_capacity(contents.len() + flag.len() * 2);

    for line in contents.split_inclusive('\n') {
        let (body, ending) = match line.strip_suffix("\r\n") {
            Some(body) => (body, "\r\n"),
            None => match line.strip_suffix('\n') {
                Some(body) => (body, "\n"),
                None => (line, ""),
            },
        };

        patched.push_str(body);
        let is_kernel = body.trim_start().starts_with("kernel");
        if is_kernel && !body.split_whitespace().any(|word| word == flag) {
            patched.push(' ');
            patched.push_str(&flag);
        }
        patched.push_str(ending);
    }

    patched
}

/// Rewrite the boot config in place with the unrecoverable flag.
///
/// The new contents go to a sibling temp file first and replace the original
/// by rename, so a power loss leaves either the old or the new file.
pub fn persist_unrecoverable_flag(path: &Path, key: &str, value: &str) -> std::io::Result<()> {
    let original = fs::read_to_string(path)?;
    let patched = patch_kernel_lines(&original, key, value);
    if patched == original {
        return Ok(());
    }

    let tmp = path.with_extension("erase-tmp");
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(patched.as_bytes())?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;

    if let Some(dir) = path.parent() {
        if let Ok(dir) = fs::File::open(dir) {
            let _ = dir.sync_all();
        }
    }

    tracing::warn!(path = %path.display(), "Persisted {}={} in boot configuration", key, value);
    Ok(())
}

/// True if the kernel command line carries `key=value`.
pub fn flag_in_cmdline(cmdline: &str, key: &str, value: &str) -> bool {
    cmdline
        .split_whitespace()
        .filter_map(|word| word.split_once('='))
        .any(|(k, v)| k == key && v == value)
}

/// Whether the previous boot recorded an unrecoverable failure.
///
/// Checks the process environment first, then `/proc/cmdline`.
pub fn unrecoverable_flag_set(key: &str, value: &str) -> bool {
    if let Ok(current) = std::env::var(key) {
        if current == value {
            return true;
        }
    }

    fs::read_to_string("/proc/cmdline")
        .map(|cmdline| flag_in_cmdline(&cmdline, key, value))
        .unwrap_or(false)
}
