//! 输入路径解析.

use std::env;
use std::path::{Path, PathBuf};

/// 数据目录环境变量.
pub const DATA_DIR_ENV: &str = "LUNG_NODULE_DATA_DIR";

/// 获取 `{用户主目录}/dataset` 目录下给定继续项组成的全路径.
pub fn home_dataset_dir_with<P: AsRef<Path>, I: IntoIterator<Item = P>>(it: I) -> Option<PathBuf> {
    let mut ans = dirs::home_dir()?;
    ans.push("dataset");
    ans.extend(it);
    Some(ans)
}

/// 获取数据基本路径.
///
/// 1. 若环境变量 `$LUNG_NODULE_DATA_DIR` 非空, 则返回其值;
/// 2. 否则, 返回 `$HOME/dataset`. 无法确定主目录时返回 `None`.
pub fn data_dir_from_env_or_home() -> Option<PathBuf> {
    match env::var(DATA_DIR_ENV) {
        Ok(d) if !d.is_empty() => Some(PathBuf::from(d)),
        _ => home_dataset_dir_with::<&str, _>([]),
    }
}

/// 解析输入路径: 存在或为绝对路径时原样返回, 否则在数据基本路径下查找.
pub fn resolve_input<P: AsRef<Path>>(path: P) -> PathBuf {
    resolve_in(path.as_ref(), data_dir_from_env_or_home())
}

fn resolve_in(path: &Path, base: Option<PathBuf>) -> PathBuf {
    if path.is_absolute() || path.exists() {
        return path.to_path_buf();
    }
    match base {
        Some(base) if base.join(path).exists() => base.join(path),
        _ => path.to_path_buf(),
    }
}
