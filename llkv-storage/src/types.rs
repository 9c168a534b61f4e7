/// Slash-separated address of a blob in the pager namespace
/// (for example `orders/snapshot/snapshot-3`).
///
/// Higher layers build keys through their file layout and otherwise treat them as
/// opaque handles.
pub type PhysicalKey = String;

/// Join key segments with `/`, skipping empty segments.
pub fn join_key<I, S>(segments: I) -> PhysicalKey
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = String::new();
    for segment in segments {
        let segment = segment.as_ref().trim_matches('/');
        if segment.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push('/');
        }
        out.push_str(segment);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_key_skips_empty_segments() {
        assert_eq!(join_key(["t", "", "snapshot/", "snapshot-1"]), "t/snapshot/snapshot-1");
        assert_eq!(join_key(["", "a"]), "a");
        assert_eq!(join_key(Vec::<&str>::new()), "");
    }
}
