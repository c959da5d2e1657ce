use crate::document::{qualified_tag, ElementNode, ElementWalk};
use crate::error::Result;
use crate::schema::list_tag;
use log::debug;

/// Range boundaries hoisted out of a list wrapper into the nearby context.
pub const BOUNDARY_TAGS: [&str; 2] = ["DTSTART", "DTEND"];

/// Receiver of the walk over a statement. Each hook defaults to a no-op so a
/// consumer implements only the ones it needs.
pub trait ListEvents {
    /// Opens one occurrence of `list`. Returning `false` skips the occurrence.
    fn begin_list(&mut self, _list: &str) -> Result<bool> {
        Ok(true)
    }

    fn begin_record(&mut self) {}

    fn put(&mut self, _tag: &str, _value: &str, _qualified_tag: &str) {}

    fn end_record(&mut self) {}

    fn end_list(&mut self) -> Result<()> {
        Ok(())
    }

    fn finalize(&mut self) -> Result<()> {
        Ok(())
    }
}

/// A tag/value pair with its parent-qualified form, e.g. `BANKACCTFROM/ACCTID`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextPair {
    pub tag: String,
    pub value: String,
    pub qualified_tag: String,
}

impl ContextPair {
    pub fn new(tag: &str, value: &str, qualified_tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            value: value.to_string(),
            qualified_tag: qualified_tag.to_string(),
        }
    }
}

/// Walks list occurrences of a document and reports them to a [`ListEvents`].
pub struct ContextWalker<'a> {
    known_lists: &'a [String],
}

impl<'a> ContextWalker<'a> {
    pub fn new(known_lists: &'a [String]) -> Self {
        Self { known_lists }
    }

    fn is_known_list(&self, tag: &str) -> bool {
        self.known_lists.iter().any(|l| l == tag)
    }

    /// Values found in `scope` outside every list wrapper, preceded by
    /// `globals`, plus the wrapper's boundary dates.
    pub fn context_vector<N: ElementNode>(
        &self,
        scope: &N,
        list: &str,
        globals: &[ContextPair],
    ) -> Vec<ContextPair> {
        let mut context = globals.to_vec();
        self.collect_context(scope, None, list_tag(list), &mut context);
        context
    }

    fn collect_context<N: ElementNode>(
        &self,
        node: &N,
        parent: Option<&N>,
        wrapper: &str,
        context: &mut Vec<ContextPair>,
    ) {
        if self.is_known_list(node.tag()) {
            if node.tag() == wrapper {
                for boundary in BOUNDARY_TAGS {
                    if let Some(text) = node.child(boundary).and_then(|c| c.text()) {
                        let qualified = qualified_tag(Some(wrapper), boundary);
                        context.push(ContextPair::new(boundary, text, &qualified));
                    }
                }
            }
            return;
        }

        if let Some(text) = node.text().filter(|t| !t.is_empty()) {
            let qualified = qualified_tag(parent.map(|p| p.tag()), node.tag());
            context.push(ContextPair::new(node.tag(), text, &qualified));
        }
        for child in node.children() {
            self.collect_context(child, Some(node), wrapper, context);
        }
    }

    /// Walks every occurrence of `list` in `root`.
    ///
    /// The list name is a tag path; all but its last segment select the scope
    /// of each occurrence. A bare list name uses each wrapper as its own scope.
    pub fn walk_list<N: ElementNode, E: ListEvents>(
        &self,
        root: &N,
        list: &str,
        globals: &[ContextPair],
        events: &mut E,
    ) -> Result<usize> {
        let wrapper = list_tag(list);
        if root.find_descendant(wrapper).is_none() {
            debug!("No {} in document", wrapper);
            return Ok(0);
        }

        let scope_path = match list.rfind('/') {
            Some(idx) if idx > 0 => &list[..idx],
            _ => wrapper,
        };

        let mut entries = 0;
        for scope in root.select_path(scope_path) {
            let wrappers = scope.iter_tag(wrapper);
            if wrappers.is_empty() {
                continue;
            }
            if !events.begin_list(list)? {
                debug!("List {} is not of interest", list);
                return Ok(0);
            }

            let context = self.context_vector(scope, list, globals);
            for list_element in wrappers {
                for entry in list_element.children() {
                    if BOUNDARY_TAGS.contains(&entry.tag()) {
                        continue;
                    }
                    self.walk_entry(entry, wrapper, &context, events);
                    entries += 1;
                }
            }
            events.end_list()?;
        }
        Ok(entries)
    }

    fn walk_entry<N: ElementNode, E: ListEvents>(
        &self,
        entry: &N,
        wrapper: &str,
        context: &[ContextPair],
        events: &mut E,
    ) {
        events.begin_record();
        for pair in entry_pseudo_tags(entry, wrapper) {
            events.put(&pair.tag, &pair.value, &pair.qualified_tag);
        }
        for pair in context {
            events.put(&pair.tag, &pair.value, &pair.qualified_tag);
        }
        for (node, parent) in ElementWalk::new(entry) {
            if let Some(text) = node.text() {
                let qualified = match parent {
                    Some(p) => format!("{}/{}", p.tag(), node.tag()),
                    None => node.tag().to_string(),
                };
                events.put(node.tag(), text, &qualified);
            }
        }
        events.end_record();
    }
}

/// `FID` and `ORG` of the institution that signed the response. They sit
/// outside every list scope but belong to every record.
pub fn document_globals<N: ElementNode>(root: &N) -> Vec<ContextPair> {
    let Some(fi) = root
        .find_descendant("SONRS")
        .and_then(|signon| signon.find_descendant("FI"))
    else {
        return Vec::new();
    };

    ["FID", "ORG"]
        .into_iter()
        .filter_map(|tag| {
            let text = fi.child(tag)?.text()?;
            Some(ContextPair::new(tag, text, &format!("FI/{}", tag)))
        })
        .collect()
}

/// Entry-level values that are not in the document: `ELEMENTNAME` (the entry's
/// own tag) and, for investment transactions, a `BUYSELL` classification.
pub fn entry_pseudo_tags<N: ElementNode>(entry: &N, wrapper: &str) -> Vec<ContextPair> {
    let mut pairs = Vec::with_capacity(2);
    if wrapper == "INVTRANLIST" {
        let side = buy_sell(entry);
        pairs.push(ContextPair::new("BUYSELL", side, "INVTRANLIST/BUYSELL"));
    }
    pairs.push(ContextPair::new(
        "ELEMENTNAME",
        entry.tag(),
        &format!("{}/ELEMENTNAME", wrapper),
    ));
    pairs
}

fn buy_sell<N: ElementNode>(entry: &N) -> &'static str {
    let tag = entry.tag();
    match tag {
        _ if tag.starts_with("BUY") => "BUY",
        _ if tag.starts_with("SELL") => "SELL",
        "INVBANKTRAN" => {
            let amount = entry
                .child("STMTTRN")
                .and_then(|t| t.child("TRNAMT"))
                .and_then(|a| a.text());
            match amount {
                Some(a) if a.trim_start().starts_with('-') => "SELL",
                Some(_) => "BUY",
                None => "OTHER",
            }
        }
        "INCOME" | "REINVEST" => "INCOME",
        "INVEXPENSE" | "MARGININTEREST" => "FEES",
        _ => "OTHER",
    }
}

/// Logs every event; useful for checking what a document will produce before
/// a mapping is written.
#[derive(Debug, Default)]
pub struct EventTrace {
    pub lists: usize,
    pub records: usize,
    pub puts: usize,
}

impl ListEvents for EventTrace {
    fn begin_list(&mut self, list: &str) -> Result<bool> {
        self.lists += 1;
        debug!("List {}", list);
        Ok(true)
    }

    fn begin_record(&mut self) {
        self.records += 1;
    }

    fn put(&mut self, tag: &str, value: &str, qualified_tag: &str) {
        self.puts += 1;
        debug!("{}={} ({})", tag, value, qualified_tag);
    }
}
