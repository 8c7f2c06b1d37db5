use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use thiserror::Error;

use crate::store::InjectionInsert;

#[derive(Debug, Error)]
pub enum InjectError {
    #[error("xml parse error: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("document has no root element")]
    NoRoot,
}

/// Insert `<entry id="…">value</entry>` children into the first `<detail>`
/// element, creating one under the document root when absent. Everything
/// else passes through event-for-event, so existing content is preserved.
pub fn inject_entries(xml: &[u8], entries: &[InjectionInsert]) -> Result<Vec<u8>, InjectError> {
    let mut reader = Reader::from_reader(xml);
    let mut writer = Writer::new(Vec::new());
    let mut buf = Vec::new();

    let mut depth: usize = 0;
    let mut saw_root = false;
    // Depth of the first <detail> start tag; entries go just before its end.
    let mut detail_depth: Option<usize> = None;
    let mut injected = false;

    loop {
        let event = reader.read_event_into(&mut buf)?;
        match event {
            Event::Start(start) => {
                saw_root = true;
                depth += 1;
                if !injected && detail_depth.is_none() && start.name().as_ref() == b"detail" {
                    detail_depth = Some(depth);
                }
                writer.write_event(Event::Start(start))?;
            }
            Event::End(end) => {
                if !injected && detail_depth == Some(depth) {
                    write_entries(&mut writer, entries)?;
                    injected = true;
                }
                if depth == 1 && !injected {
                    // No <detail> anywhere: create it as the last child of
                    // the document root.
                    write_detail_block(&mut writer, entries)?;
                    injected = true;
                }
                depth = depth.saturating_sub(1);
                writer.write_event(Event::End(end))?;
            }
            Event::Empty(empty) => {
                let at_root = depth == 0;
                saw_root = saw_root || at_root;
                let is_detail = empty.name().as_ref() == b"detail";
                if !injected && detail_depth.is_none() && is_detail {
                    // Expand <detail/> so the entries have a parent.
                    writer.write_event(Event::Start(empty))?;
                    write_entries(&mut writer, entries)?;
                    writer.write_event(Event::End(BytesEnd::new("detail")))?;
                    injected = true;
                } else if at_root && !injected {
                    // Self-closing document root: expand it and add the block.
                    let name = String::from_utf8_lossy(empty.name().as_ref()).into_owned();
                    writer.write_event(Event::Start(empty))?;
                    write_detail_block(&mut writer, entries)?;
                    writer.write_event(Event::End(BytesEnd::new(name)))?;
                    injected = true;
                } else {
                    writer.write_event(Event::Empty(empty))?;
                }
            }
            Event::Eof => break,
            other => writer.write_event(other)?,
        }
        buf.clear();
    }

    if !saw_root {
        return Err(InjectError::NoRoot);
    }

    Ok(writer.into_inner())
}

fn write_entries(
    writer: &mut Writer<Vec<u8>>,
    entries: &[InjectionInsert],
) -> Result<(), quick_xml::Error> {
    for entry in entries {
        let mut start = BytesStart::new("entry");
        start.push_attribute(("id", entry.field_id.as_str()));
        writer.write_event(Event::Start(start))?;
        writer.write_event(Event::Text(BytesText::new(&entry.value)))?;
        writer.write_event(Event::End(BytesEnd::new("entry")))?;
    }
    Ok(())
}

fn write_detail_block(
    writer: &mut Writer<Vec<u8>>,
    entries: &[InjectionInsert],
) -> Result<(), quick_xml::Error> {
    writer.write_event(Event::Start(BytesStart::new("detail")))?;
    write_entries(writer, entries)?;
    writer.write_event(Event::End(BytesEnd::new("detail")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, value: &str) -> InjectionInsert {
        InjectionInsert {
            field_id: id.to_string(),
            value: value.to_string(),
            was_update: true,
        }
    }

    fn inject_str(xml: &str, entries: &[InjectionInsert]) -> String {
        String::from_utf8(inject_entries(xml.as_bytes(), entries).unwrap()).unwrap()
    }

    #[test]
    fn creates_detail_under_empty_root() {
        let out = inject_str("<root></root>", &[entry("sampling_rate", "100")]);
        assert_eq!(
            out,
            "<root><detail><entry id=\"sampling_rate\">100</entry></detail></root>"
        );
    }

    #[test]
    fn expands_self_closing_root() {
        let out = inject_str("<root/>", &[entry("sampling_rate", "100")]);
        assert_eq!(
            out,
            "<root><detail><entry id=\"sampling_rate\">100</entry></detail></root>"
        );
    }

    #[test]
    fn appends_into_existing_detail_preserving_children() {
        let xml = "<log><detail><lap>3</lap></detail><data>x</data></log>";
        let out = inject_str(xml, &[entry("run_name", "fri-am")]);
        assert_eq!(
            out,
            "<log><detail><lap>3</lap><entry id=\"run_name\">fri-am</entry></detail><data>x</data></log>"
        );
    }

    #[test]
    fn only_first_detail_receives_entries() {
        let xml = "<log><detail/><detail></detail></log>";
        let out = inject_str(xml, &[entry("a", "1")]);
        assert_eq!(
            out,
            "<log><detail><entry id=\"a\">1</entry></detail><detail></detail></log>"
        );
    }

    #[test]
    fn escapes_entry_values() {
        let out = inject_str("<root></root>", &[entry("note", "a<b & c")]);
        assert!(out.contains("a&lt;b &amp; c"));
    }

    #[test]
    fn preserves_surrounding_document() {
        let xml = "<?xml version=\"1.0\"?><log attr=\"v\"><head>kept</head><detail></detail></log>";
        let out = inject_str(xml, &[entry("x", "1")]);
        assert!(out.starts_with("<?xml version=\"1.0\"?>"));
        assert!(out.contains("<head>kept</head>"));
        assert!(out.contains("<detail><entry id=\"x\">1</entry></detail>"));
    }

    #[test]
    fn rejects_empty_document() {
        assert!(matches!(
            inject_entries(b"", &[entry("a", "1")]),
            Err(InjectError::NoRoot)
        ));
    }

    #[test]
    fn no_entries_still_creates_empty_detail() {
        let out = inject_str("<root></root>", &[]);
        assert_eq!(out, "<root><detail></detail></root>");
    }
}
