//! Markup events flowing between pipeline stages.

/// One event of a document stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    StartElement {
        name: String,
        attributes: Vec<(String, String)>,
    },
    EndElement {
        name: String,
    },
    Text(String),
}

impl Event {
    pub fn start(name: impl Into<String>) -> Self {
        Event::StartElement {
            name: name.into(),
            attributes: Vec::new(),
        }
    }

    pub fn start_with(name: impl Into<String>, attributes: Vec<(String, String)>) -> Self {
        Event::StartElement {
            name: name.into(),
            attributes,
        }
    }

    pub fn end(name: impl Into<String>) -> Self {
        Event::EndElement { name: name.into() }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Event::Text(text.into())
    }

    /// `<name>text</name>` as three events.
    pub fn element(name: &str, text: impl Into<String>) -> [Event; 3] {
        [Event::start(name), Event::text(text), Event::end(name)]
    }
}

/// Concatenated text content of a stream.
pub fn text_content(events: &[Event]) -> String {
    events
        .iter()
        .filter_map(|e| match e {
            Event::Text(t) => Some(t.as_str()),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_content() {
        let mut events = vec![Event::start("doc")];
        events.extend(Event::element("p", "a"));
        events.push(Event::text("b"));
        events.push(Event::end("doc"));
        assert_eq!(text_content(&events), "ab");
    }
}
