use regex::Regex;
use std::{
    env,
    ffi::OsString,
    path::{Path, PathBuf},
    sync::{LazyLock, Mutex, MutexGuard, PoisonError},
};

static UNSAFE_FILENAME_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\x20-\x7E]+").expect("valid regex"));

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn find_mp4decrypt() -> Option<PathBuf> {
    let bin = if cfg!(target_os = "windows") {
        "mp4decrypt.exe"
    } else {
        "mp4decrypt"
    };

    if Path::new(bin).exists() {
        return Some(PathBuf::from(bin));
    }

    env::split_paths(&env::var_os("PATH")?).find_map(|x| {
        let x = x.join(bin);

        if x.is_file() { Some(x) } else { None }
    })
}

/// `video.mp4` with `decrypted` becomes `video.decrypted.mp4`.
pub(crate) fn prepend_extension(path: &Path, ext: &str) -> PathBuf {
    let mut name = path.file_stem().map(OsString::from).unwrap_or_default();
    name.push(".");
    name.push(ext);

    if let Some(real_ext) = path.extension() {
        name.push(".");
        name.push(real_ext);
    }

    path.with_file_name(name)
}

/// Drop everything outside printable ASCII from a file name.
pub(crate) fn sanitize_filename(name: &str) -> String {
    let safe = UNSAFE_FILENAME_CHARS.replace_all(name, "");

    if safe.is_empty() || safe.starts_with('.') {
        format!("track{}", safe)
    } else {
        safe.into_owned()
    }
}

/// `name` when no file in `dir` has it, `name` with a numeric infix otherwise.
pub(crate) fn unused_name(dir: &Path, name: &str, taken: &[&str]) -> String {
    let free = |x: &str| !taken.contains(&x) && !dir.join(x).exists();

    if free(name) {
        return name.to_owned();
    }

    (1..)
        .map(|n| prepend_extension(Path::new(name), &n.to_string()))
        .map(|x| x.to_string_lossy().into_owned())
        .find(|x| free(x.as_str()))
        .unwrap_or_else(|| name.to_owned())
}
