/// Controls how [`glimpse_vec`] abbreviates long slices.
#[derive(Debug, Clone, Copy)]
pub struct GlimpseConfig {
    /// Slices longer than this are abbreviated.
    pub max_items: usize,
    pub padding: usize,
    pub new_line: bool,
}

impl Default for GlimpseConfig {
    fn default() -> Self {
        GlimpseConfig {
            max_items: 10,
            padding: 0,
            new_line: false,
        }
    }
}

const EDGE_ITEMS: usize = 3;

/// Short debug rendering of a slice, used when logging offsets, peaks and
/// modification lists that can hold millions of elements.
///
/// # Example
/// ```
/// use seqmatch::utils::display::glimpse_vec;
///
/// let out = glimpse_vec(&[1, 2, 3], None);
/// assert_eq!(out, "[1, 2, 3]");
/// ```
pub fn glimpse_vec<T: std::fmt::Debug>(v: &[T], config: Option<GlimpseConfig>) -> String {
    let config = config.unwrap_or_default();
    let separator = if config.new_line { ",\n" } else { ", " };
    let padding = " ".repeat(config.padding);
    let render = |items: &[T]| -> Vec<String> {
        items
            .iter()
            .map(|x| format!("{}{:?}", padding, x))
            .collect()
    };

    let len = v.len();
    if len <= config.max_items {
        return format!("[{}]", render(v).join(separator));
    }

    let edge = EDGE_ITEMS.min(config.max_items.max(1));
    let mut parts = render(&v[..edge]);
    parts.push(format!("{}...", padding));
    parts.extend(render(&v[len - edge..]));
    format!("[{}] len = {}", parts.join(separator), len)
}
