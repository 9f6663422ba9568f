//! Exclusive XML canonicalization (`http://www.w3.org/2001/10/xml-exc-c14n#`),
//! without comments, over a slice of xml-rs reader events.

use crate::error::{Error, Result};

fn canon_attr_map(a: &xml::attribute::OwnedAttribute) -> (xml::name::Name<'_>, String) {
    (
        a.name.borrow(),
        a.value
            .replace("&", "&amp;")
            .replace("<", "&lt;")
            .replace("\"", "&quot;")
            .replace("\t", "&#x9;")
            .replace("\n", "&#xA;")
            .replace("\r", "&#xD;"),
    )
}

fn canon_text(data: &str) -> String {
    data.replace("\r\n", "\n")
        .replace("&", "&amp;")
        .replace("<", "&lt;")
        .replace(">", "&gt;")
        .replace("\r", "&#xD;")
}

/// Canonicalizes the first element in `events` and everything below it.
///
/// Only namespace bindings visibly utilized by an element or its attributes
/// are rendered, and only where an output ancestor has not already rendered
/// the same binding.
pub fn canonicalize(events: &[xml::reader::XmlEvent]) -> Result<String> {
    let mut output = Vec::new();
    let mut output_writer = xml::writer::EventWriter::new_with_config(
        &mut output,
        xml::writer::EmitterConfig {
            perform_indent: false,
            perform_escaping: false,
            write_document_declaration: false,
            autopad_comments: false,
            cdata_to_characters: true,
            line_separator: std::borrow::Cow::Borrowed("\n"),
            normalize_empty_elements: false,
            ..std::default::Default::default()
        },
    );

    let mut level: usize = 0;
    let mut exc_ns_stack = xml::namespace::NamespaceStack::default();
    for event in events {
        match match event {
            xml::reader::XmlEvent::StartElement {
                name,
                attributes,
                namespace,
            } => {
                level += 1;

                let element_prefix = name.prefix.as_deref().unwrap_or("");
                let attribute_prefixes = attributes
                    .iter()
                    .filter_map(|a| a.name.prefix.as_deref())
                    .collect::<Vec<_>>();
                exc_ns_stack.push_empty();
                exc_ns_stack.extend(
                    namespace
                        .0
                        .iter()
                        .filter(|n| n.0 == element_prefix || attribute_prefixes.contains(&n.0.as_str()))
                        .map(|n| (n.0.as_str(), n.1.as_str()))
                        .collect::<Vec<_>>(),
                );

                let mut mapped_attr = attributes
                    .iter()
                    .map(canon_attr_map)
                    .collect::<Vec<_>>();
                mapped_attr.sort_by(|a, b| match (a.0.prefix, b.0.prefix) {
                    (None, None) => a.0.local_name.cmp(b.0.local_name),
                    (None, Some(_)) => std::cmp::Ordering::Less,
                    (Some(_), Some(_)) => {
                        let a_ns = a.0.namespace.unwrap_or_default();
                        let b_ns = b.0.namespace.unwrap_or_default();
                        if a_ns == b_ns {
                            a.0.local_name.cmp(b.0.local_name)
                        } else {
                            a_ns.cmp(b_ns)
                        }
                    }
                    (Some(_), None) => std::cmp::Ordering::Greater,
                });
                output_writer.write(xml::writer::XmlEvent::StartElement {
                    name: name.borrow(),
                    attributes: mapped_attr
                        .iter()
                        .map(|a| xml::attribute::Attribute {
                            name: a.0,
                            value: &a.1,
                        })
                        .collect(),
                    namespace: std::borrow::Cow::Owned(exc_ns_stack.squash()),
                })
            }
            xml::reader::XmlEvent::EndElement { name } => {
                level = level.saturating_sub(1);
                exc_ns_stack.try_pop();

                match output_writer.write(xml::writer::XmlEvent::EndElement {
                    name: Some(name.borrow()),
                }) {
                    Ok(_) => {
                        if level == 0 {
                            break;
                        }
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            }
            xml::reader::XmlEvent::CData(data)
            | xml::reader::XmlEvent::Characters(data)
            | xml::reader::XmlEvent::Whitespace(data) => {
                if level > 0 {
                    output_writer.write(xml::writer::XmlEvent::Characters(&canon_text(data)))
                } else {
                    Ok(())
                }
            }
            xml::reader::XmlEvent::ProcessingInstruction { name, data } => {
                if level > 0 {
                    output_writer.write(xml::writer::XmlEvent::ProcessingInstruction {
                        name,
                        data: data.as_deref(),
                    })
                } else {
                    Ok(())
                }
            }
            _ => Ok(()),
        } {
            Ok(_) => {}
            Err(e) => return Err(Error::Canonicalization(e.to_string())),
        }
    }

    let canonical = String::from_utf8(output).map_err(|e| Error::Canonicalization(e.to_string()))?;
    log::trace!("canonical form: {}", canonical);
    Ok(canonical)
}

/// Parses `source` and canonicalizes its document element.
pub fn canonicalize_str(source: &str) -> Result<String> {
    let document = crate::tree::Document::parse(source)?;
    canonicalize(&document.events(&crate::tree::NodePath::root())?)
}
