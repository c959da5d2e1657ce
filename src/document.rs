//! The element-tree view of a parsed statement.
//!
//! Parsing a concrete interchange format is left to the caller; the loader only
//! needs ordered children, tag names and text. [`Element`] is a plain owned
//! tree that any parser can build.

use serde::{Deserialize, Serialize};

pub trait ElementNode: Sized {
    fn tag(&self) -> &str;

    /// Text content. Aggregates usually carry none; an element with both text
    /// and children is still treated as having text.
    fn text(&self) -> Option<&str>;

    fn children(&self) -> &[Self];

    fn child(&self, tag: &str) -> Option<&Self> {
        self.children().iter().find(|c| c.tag() == tag)
    }

    /// First element below `self` (depth-first, pre-order) with the given tag.
    fn find_descendant(&self, tag: &str) -> Option<&Self> {
        for child in self.children() {
            if child.tag() == tag {
                return Some(child);
            }
            if let Some(found) = child.find_descendant(tag) {
                return Some(found);
            }
        }
        None
    }

    /// `self` and every element below it with the given tag, in document order.
    fn iter_tag<'a>(&'a self, tag: &str) -> Vec<&'a Self> {
        let mut found = Vec::new();
        for (node, _) in ElementWalk::new(self) {
            if node.tag() == tag {
                found.push(node);
            }
        }
        found
    }

    /// Every element below `self` whose tag path ends with `path`
    /// (`/`-separated), in document order. `self` itself is never matched.
    fn select_path<'a>(&'a self, path: &str) -> Vec<&'a Self> {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let Some((first, rest)) = segments.split_first() else {
            return Vec::new();
        };

        let mut current: Vec<&Self> = ElementWalk::new(self)
            .skip(1)
            .filter(|(node, _)| node.tag() == *first)
            .map(|(node, _)| node)
            .collect();

        for &segment in rest {
            current = current
                .into_iter()
                .flat_map(move |node| {
                    node.children()
                        .iter()
                        .filter(move |c| c.tag() == segment)
                })
                .collect();
        }
        current
    }
}

/// Depth-first, pre-order walk yielding each element together with its direct
/// parent. The starting element is yielded first, with no parent.
pub struct ElementWalk<'a, N: ElementNode> {
    stack: Vec<(&'a N, Option<&'a N>)>,
}

impl<'a, N: ElementNode> ElementWalk<'a, N> {
    pub fn new(start: &'a N) -> Self {
        Self {
            stack: vec![(start, None)],
        }
    }
}

impl<'a, N: ElementNode> Iterator for ElementWalk<'a, N> {
    type Item = (&'a N, Option<&'a N>);

    fn next(&mut self) -> Option<Self::Item> {
        let (current, parent) = self.stack.pop()?;
        for child in current.children().iter().rev() {
            self.stack.push((child, Some(current)));
        }
        Some((current, parent))
    }
}

/// `parent/tag`, or `/tag` when there is no parent.
pub fn qualified_tag(parent: Option<&str>, tag: &str) -> String {
    format!("{}/{}", parent.unwrap_or(""), tag)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Element {
    pub tag: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub children: Vec<Element>,
}

impl Element {
    pub fn aggregate(tag: &str, children: Vec<Element>) -> Self {
        Self {
            tag: tag.to_string(),
            text: None,
            children,
        }
    }

    pub fn leaf(tag: &str, text: &str) -> Self {
        Self {
            tag: tag.to_string(),
            text: Some(text.to_string()),
            children: Vec::new(),
        }
    }
}

impl ElementNode for Element {
    fn tag(&self) -> &str {
        &self.tag
    }

    fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    fn children(&self) -> &[Self] {
        &self.children
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Element {
        Element::aggregate(
            "OFX",
            vec![Element::aggregate(
                "INVSTMTRS",
                vec![
                    Element::leaf("CURDEF", "USD"),
                    Element::aggregate(
                        "INVACCTFROM",
                        vec![Element::leaf("ACCTID", "123")],
                    ),
                    Element::aggregate(
                        "INVTRANLIST",
                        vec![
                            Element::leaf("DTSTART", "20230101"),
                            Element::aggregate("BUYSTOCK", vec![Element::leaf("UNITS", "5")]),
                        ],
                    ),
                ],
            )],
        )
    }

    #[test]
    fn test_walk_is_preorder_with_parents() {
        let doc = sample();
        let visited: Vec<(String, Option<String>)> = ElementWalk::new(&doc.children[0])
            .map(|(n, p)| (n.tag.clone(), p.map(|p| p.tag.clone())))
            .collect();

        let tags: Vec<&str> = visited.iter().map(|(t, _)| t.as_str()).collect();
        assert_eq!(
            tags,
            vec![
                "INVSTMTRS",
                "CURDEF",
                "INVACCTFROM",
                "ACCTID",
                "INVTRANLIST",
                "DTSTART",
                "BUYSTOCK",
                "UNITS"
            ]
        );
        assert_eq!(visited[0].1, None);
        assert_eq!(visited[3].1.as_deref(), Some("INVACCTFROM"));
    }

    #[test]
    fn test_find_and_select() {
        let doc = sample();
        assert_eq!(doc.find_descendant("ACCTID").unwrap().text(), Some("123"));
        assert!(doc.find_descendant("SECLIST").is_none());

        assert_eq!(doc.select_path("INVSTMTRS").len(), 1);
        assert_eq!(doc.select_path("INVSTMTRS/INVTRANLIST").len(), 1);
        assert_eq!(doc.select_path("INVTRANLIST/BUYSTOCK")[0].tag(), "BUYSTOCK");
        assert!(doc.select_path("OFX").is_empty());
        assert_eq!(doc.iter_tag("OFX").len(), 1);
    }

    #[test]
    fn test_qualified_tag() {
        assert_eq!(qualified_tag(Some("BUYSTOCK"), "UNITS"), "BUYSTOCK/UNITS");
        assert_eq!(qualified_tag(None, "UNITS"), "/UNITS");
    }
}
