//! crate 内部宏.

/// 对 `ndarray::Zip` 执行 `for_each`. 打开 `rayon` feature 时并行执行.
///
/// 闭包内只能做逐元素的独立写入, 因此并行与否不影响结果.
macro_rules! zip_for_each {
    ($zip: expr, $op: expr) => {{
        #[cfg(feature = "rayon")]
        $zip.par_for_each($op);
        #[cfg(not(feature = "rayon"))]
        $zip.for_each($op);
    }};
}
