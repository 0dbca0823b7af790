//! Metric naming for web transactions.
//!
//! Names are built from the literal request path, so `/hello/{name}` served
//! for `/hello/friend` is named `WebTransaction/Uri/hello/friend`.

/// Prefix shared by every URI-named web transaction.
pub const WEB_TRANSACTION_PREFIX: &str = "WebTransaction/Uri";

/// Normalize a request path into a route key.
///
/// Query strings and fragments are dropped, and empty segments (leading,
/// trailing or duplicated slashes) are removed.
pub fn normalize_uri(path: &str) -> String {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Build the metric name for a request path.
pub fn web_transaction_name(path: &str) -> String {
    format!("{}/{}", WEB_TRANSACTION_PREFIX, normalize_uri(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_slashes() {
        assert_eq!(normalize_uri("/hello/friend"), "hello/friend");
        assert_eq!(normalize_uri("//hello//friend/"), "hello/friend");
        assert_eq!(normalize_uri("hello"), "hello");
    }

    #[test]
    fn test_normalize_drops_query_and_fragment() {
        assert_eq!(normalize_uri("/hello/friend?greeting=hi"), "hello/friend");
        assert_eq!(normalize_uri("/docs/page#intro"), "docs/page");
    }

    #[test]
    fn test_root_path() {
        assert_eq!(normalize_uri("/"), "");
        assert_eq!(web_transaction_name("/"), "WebTransaction/Uri/");
    }

    #[test]
    fn test_web_transaction_name() {
        assert_eq!(
            web_transaction_name("/hello/friend"),
            "WebTransaction/Uri/hello/friend"
        );
    }

    #[test]
    fn test_colliding_paths_share_a_name() {
        assert_eq!(
            web_transaction_name("/hello//friend"),
            web_transaction_name("/hello/friend/")
        );
    }
}
