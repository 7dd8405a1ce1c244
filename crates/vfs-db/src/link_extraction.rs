//! Link extraction from resource content.
//!
//! Finds references to other VFS resources in HTML, XML and JSP content and
//! classifies them by relation type. Only internal root paths (starting with
//! a single `/`) are returned; external URLs, protocol-relative URLs and
//! relative paths are ignored.

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;

use vfs_core::RelationType;

static IMG_SRC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)<img\b[^>]*?\bsrc\s*=\s*["']([^"']+)["']"#).expect("valid img regex")
});

static OBJECT_SRC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)<(?:object|embed)\b[^>]*?\b(?:data|src)\s*=\s*["']([^"']+)["']"#)
        .expect("valid object regex")
});

static ANCHOR_HREF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)<a\b[^>]*?\bhref\s*=\s*["']([^"']+)["']"#).expect("valid anchor regex")
});

static JSP_DIRECTIVE_INCLUDE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<%@\s*include\s+file\s*=\s*["']([^"']+)["']"#).expect("valid include regex")
});

static CMS_INCLUDE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)<cms:include\b[^>]*?\b(?:file|page)\s*=\s*["']([^"']+)["']"#)
        .expect("valid cms:include regex")
});

static CMS_LINK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<cms:link>\s*([^<\s]+)\s*</cms:link>").expect("valid cms:link regex")
});

static XSD_LOCATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"xsi:noNamespaceSchemaLocation\s*=\s*["']([^"']+)["']"#)
        .expect("valid schema location regex")
});

/// Extract typed links to internal resources.
///
/// Query strings and fragments are stripped. The result is deduplicated and
/// sorted by relation type, then path.
///
/// # Examples
///
/// ```
/// use vfs_core::RelationType;
/// use vfs_db::extract_links;
///
/// let html = r#"<img src="/img/logo.png"><a href="/about.html#team">About</a>"#;
/// let links = extract_links(html);
/// assert!(links.contains(&(RelationType::EmbeddedImage, "/img/logo.png".to_string())));
/// assert!(links.contains(&(RelationType::Hyperlink, "/about.html".to_string())));
/// ```
pub fn extract_links(content: &str) -> Vec<(RelationType, String)> {
    let patterns: [(&Regex, RelationType); 7] = [
        (&*IMG_SRC, RelationType::EmbeddedImage),
        (&*OBJECT_SRC, RelationType::EmbeddedObject),
        (&*ANCHOR_HREF, RelationType::Hyperlink),
        (&*JSP_DIRECTIVE_INCLUDE, RelationType::JspStrong),
        (&*CMS_INCLUDE, RelationType::JspStrong),
        (&*CMS_LINK, RelationType::JspWeak),
        (&*XSD_LOCATION, RelationType::Xsd),
    ];

    let mut links = BTreeSet::new();
    for (pattern, relation_type) in patterns {
        for cap in pattern.captures_iter(content) {
            if let Some(path) = cap.get(1).and_then(|m| normalize_link(m.as_str())) {
                links.insert((relation_type, path));
            }
        }
    }
    links.into_iter().collect()
}

/// Reduce a raw link to an internal root path, or `None` if it is external.
fn normalize_link(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if !raw.starts_with('/') || raw.starts_with("//") {
        return None;
    }
    let end = raw.find(['?', '#']).unwrap_or(raw.len());
    let path = &raw[..end];
    if path.len() <= 1 {
        return None;
    }
    Some(path.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths_of(links: &[(RelationType, String)], relation_type: RelationType) -> Vec<&str> {
        links
            .iter()
            .filter(|(t, _)| *t == relation_type)
            .map(|(_, p)| p.as_str())
            .collect()
    }

    #[test]
    fn test_extract_images_and_objects() {
        let content = r#"<p><IMG class="x" SRC="/img/a.png"/><object data="/media/movie.swf"></object>
            <embed src='/media/clip.mp4'></p>"#;
        let links = extract_links(content);
        assert_eq!(paths_of(&links, RelationType::EmbeddedImage), vec!["/img/a.png"]);
        assert_eq!(
            paths_of(&links, RelationType::EmbeddedObject),
            vec!["/media/clip.mp4", "/media/movie.swf"]
        );
    }

    #[test]
    fn test_extract_hyperlinks_strips_query_and_fragment() {
        let content = r#"<a href="/news/index.html?page=2">n</a> <a href="/about.html#team">a</a>"#;
        let links = extract_links(content);
        assert_eq!(
            paths_of(&links, RelationType::Hyperlink),
            vec!["/about.html", "/news/index.html"]
        );
    }

    #[test]
    fn test_external_and_relative_links_are_ignored() {
        let content = r##"<a href="https://example.com/x">e</a><a href="//cdn.example.com/y.js">c</a>
            <a href="relative.html">r</a><a href="#top">t</a><a href="/">root</a>"##;
        assert!(extract_links(content).is_empty());
    }

    #[test]
    fn test_extract_jsp_links() {
        let content = r#"<%@ include file="/system/header.jsp" %>
            <cms:include page="/system/footer.jsp" />
            <a href="<cms:link>/sites/default/index.html</cms:link>">home</a>"#;
        let links = extract_links(content);
        assert_eq!(
            paths_of(&links, RelationType::JspStrong),
            vec!["/system/footer.jsp", "/system/header.jsp"]
        );
        assert_eq!(
            paths_of(&links, RelationType::JspWeak),
            vec!["/sites/default/index.html"]
        );
    }

    #[test]
    fn test_extract_xsd() {
        let content = r#"<Articles xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance"
            xsi:noNamespaceSchemaLocation="/system/schemas/article.xsd"></Articles>"#;
        let links = extract_links(content);
        assert_eq!(links, vec![(RelationType::Xsd, "/system/schemas/article.xsd".to_string())]);
    }

    #[test]
    fn test_duplicates_are_removed() {
        let content = r#"<img src="/a.png"><img src="/a.png?v=2"><a href="/a.png">x</a>"#;
        let links = extract_links(content);
        assert_eq!(links.len(), 2);
    }

    #[test]
    fn test_empty_content() {
        assert!(extract_links("").is_empty());
        assert!(extract_links("plain text with /a/path.html").is_empty());
    }
}
