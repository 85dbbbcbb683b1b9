/// Placeholder for path segments that look like identifiers.
pub const PLACEHOLDER: &str = "?";

/// Collapses a URL path into a low cardinality path group.
///
/// Any segment containing a digit is replaced with `?`, except API version segments such as
/// `v1`. Raw paths would otherwise create a resource per ID. Trailing slashes are dropped, so
/// `/orders/12/` and `/orders/12` share a group.
///
/// ```
/// use degica_datadog::path_group;
///
/// assert_eq!(path_group(Some("/api/v1/orders/42")).as_deref(), Some("/api/v1/orders/?"));
/// assert_eq!(path_group(Some("")).as_deref(), Some("/"));
/// assert_eq!(path_group(None), None);
/// ```
pub fn path_group(path: Option<&str>) -> Option<String> {
    let path = path?;
    if path.is_empty() {
        return Some("/".to_string());
    }

    let mut grouped: Vec<&str> = path.split('/').map(group_segment).collect();
    while grouped.last().is_some_and(|segment| segment.is_empty()) {
        grouped.pop();
    }
    Some(grouped.join("/"))
}

fn group_segment(segment: &str) -> &str {
    if is_version_segment(segment) {
        segment
    } else if segment.bytes().any(|b| b.is_ascii_digit()) {
        PLACEHOLDER
    } else {
        segment
    }
}

// v<digits>
fn is_version_segment(segment: &str) -> bool {
    segment
        .strip_prefix('v')
        .is_some_and(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
}
