//! Owned XML document tree.
//!
//! Templates are parsed once into a [`Document`] and then edited through
//! [`NodePath`] handles. Namespace declarations are kept on the element that
//! declares them, so a subtree can be turned back into xml-rs events with the
//! correct in-scope namespaces for canonicalization.

use crate::error::{Error, Result};
use xml::attribute::OwnedAttribute;
use xml::name::OwnedName;
use xml::namespace::{Namespace, NamespaceStack};
use xml::reader::XmlEvent;

#[derive(Debug, Clone)]
pub enum Node {
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone)]
pub struct Element {
    pub name: OwnedName,
    pub attributes: Vec<OwnedAttribute>,
    /// Namespace bindings introduced by this element, not inherited ones.
    pub declared: Namespace,
    pub children: Vec<Node>,
}

impl Element {
    pub fn is(&self, namespace: &str, local_name: &str) -> bool {
        self.name.namespace.as_deref() == Some(namespace) && self.name.local_name == local_name
    }

    pub fn attribute(&self, namespace: Option<&str>, local_name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name.namespace.as_deref() == namespace && a.name.local_name == local_name)
            .map(|a| a.value.as_str())
    }

    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|c| match c {
                Node::Text(t) => Some(t.as_str()),
                Node::Element(_) => None,
            })
            .collect()
    }
}

/// Child-index path from the document root to an element.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct NodePath(Vec<usize>);

impl NodePath {
    pub fn root() -> Self {
        NodePath(vec![])
    }

    pub fn parent(&self) -> Option<NodePath> {
        if self.0.is_empty() {
            None
        } else {
            Some(NodePath(self.0[..self.0.len() - 1].to_vec()))
        }
    }

    fn child(&self, index: usize) -> NodePath {
        let mut path = self.0.clone();
        path.push(index);
        NodePath(path)
    }
}

#[inline]
fn base_scope() -> Namespace {
    NamespaceStack::default().squash()
}

fn extend_scope(scope: &mut Namespace, declared: &Namespace) {
    for (prefix, uri) in &declared.0 {
        scope.0.insert(prefix.clone(), uri.clone());
    }
}

fn push_events(element: &Element, scope: &Namespace, out: &mut Vec<XmlEvent>) {
    let mut namespace = scope.clone();
    extend_scope(&mut namespace, &element.declared);

    out.push(XmlEvent::StartElement {
        name: element.name.clone(),
        attributes: element.attributes.clone(),
        namespace: namespace.clone(),
    });
    for child in &element.children {
        match child {
            Node::Element(e) => push_events(e, &namespace, out),
            Node::Text(t) => out.push(XmlEvent::Characters(t.clone())),
        }
    }
    out.push(XmlEvent::EndElement {
        name: element.name.clone(),
    });
}

fn collect_matching<F: Fn(&Element) -> bool>(
    element: &Element,
    path: &NodePath,
    predicate: &F,
    out: &mut Vec<NodePath>,
) {
    if predicate(element) {
        out.push(path.clone());
    }
    for (i, child) in element.children.iter().enumerate() {
        if let Node::Element(e) = child {
            collect_matching(e, &path.child(i), predicate, out);
        }
    }
}

#[derive(Debug, Clone)]
pub struct Document {
    root: Element,
}

impl Document {
    pub fn parse(source: &str) -> Result<Document> {
        let reader = xml::reader::EventReader::new_with_config(
            source.as_bytes(),
            xml::ParserConfig::new()
                .ignore_comments(true)
                .trim_whitespace(false)
                .whitespace_to_characters(true)
                .coalesce_characters(true)
                .cdata_to_characters(true)
                .ignore_root_level_whitespace(true),
        );

        let mut stack: Vec<(Element, Namespace)> = vec![];
        let mut root = None;
        for event in reader {
            match event.map_err(|e| Error::Canonicalization(format!("unable to decode XML: {}", e)))? {
                XmlEvent::StartElement {
                    name,
                    attributes,
                    namespace,
                } => {
                    let parent_scope = match stack.last() {
                        Some((_, scope)) => scope.clone(),
                        None => base_scope(),
                    };
                    let declared = Namespace(
                        namespace
                            .0
                            .iter()
                            .filter(|(prefix, uri)| parent_scope.get(prefix.as_str()) != Some(uri.as_str()))
                            .map(|(prefix, uri)| (prefix.clone(), uri.clone()))
                            .collect(),
                    );
                    stack.push((
                        Element {
                            name,
                            attributes,
                            declared,
                            children: vec![],
                        },
                        namespace,
                    ));
                }
                XmlEvent::EndElement { .. } => {
                    let (element, _) = stack
                        .pop()
                        .ok_or_else(|| Error::Canonicalization("unbalanced end element".to_string()))?;
                    match stack.last_mut() {
                        Some((parent, _)) => parent.children.push(Node::Element(element)),
                        None => root = Some(element),
                    }
                }
                XmlEvent::Characters(text) | XmlEvent::Whitespace(text) | XmlEvent::CData(text) => {
                    if let Some((parent, _)) = stack.last_mut() {
                        parent.children.push(Node::Text(text));
                    }
                }
                _ => {}
            }
        }

        match root {
            Some(root) => Ok(Document { root }),
            None => Err(Error::Canonicalization("document has no root element".to_string())),
        }
    }

    pub fn load(path: &std::path::Path) -> Result<Document> {
        let template_load = |reason: String| Error::TemplateLoad {
            path: path.display().to_string(),
            reason,
        };
        let source = std::fs::read_to_string(path).map_err(|e| template_load(e.to_string()))?;
        Document::parse(&source).map_err(|e| template_load(e.to_string()))
    }

    pub fn root(&self) -> &Element {
        &self.root
    }

    pub fn element(&self, path: &NodePath) -> Option<&Element> {
        let mut current = &self.root;
        for &i in &path.0 {
            current = match current.children.get(i) {
                Some(Node::Element(e)) => e,
                _ => return None,
            };
        }
        Some(current)
    }

    pub fn element_mut(&mut self, path: &NodePath) -> Option<&mut Element> {
        let mut current = &mut self.root;
        for &i in &path.0 {
            current = match current.children.get_mut(i) {
                Some(Node::Element(e)) => e,
                _ => return None,
            };
        }
        Some(current)
    }

    fn existing_mut(&mut self, path: &NodePath) -> Result<&mut Element> {
        self.element_mut(path)
            .ok_or_else(|| Error::MissingNode(format!("no element at {:?}", path)))
    }

    pub fn find_all_within(&self, scope: &NodePath, namespace: &str, local_name: &str) -> Vec<NodePath> {
        let mut out = vec![];
        if let Some(element) = self.element(scope) {
            collect_matching(element, scope, &|e: &Element| e.is(namespace, local_name), &mut out);
        }
        out
    }

    pub fn find_all(&self, namespace: &str, local_name: &str) -> Vec<NodePath> {
        self.find_all_within(&NodePath::root(), namespace, local_name)
    }

    pub fn find(&self, namespace: &str, local_name: &str) -> Option<NodePath> {
        self.find_all(namespace, local_name).into_iter().next()
    }

    /// Like [`Document::find`], failing with [`Error::MissingNode`].
    pub fn require(&self, namespace: &str, local_name: &str) -> Result<NodePath> {
        self.find(namespace, local_name)
            .ok_or_else(|| Error::MissingNode(format!("{{{}}}{}", namespace, local_name)))
    }

    pub fn require_within(&self, scope: &NodePath, namespace: &str, local_name: &str) -> Result<NodePath> {
        self.find_all_within(scope, namespace, local_name)
            .into_iter()
            .next()
            .ok_or_else(|| Error::MissingNode(format!("{{{}}}{}", namespace, local_name)))
    }

    /// Every element carrying an `Id` attribute (in any namespace) equal to `id`.
    pub fn find_all_by_id(&self, id: &str) -> Vec<NodePath> {
        let mut out = vec![];
        collect_matching(
            &self.root,
            &NodePath::root(),
            &|e: &Element| {
                e.attributes
                    .iter()
                    .any(|a| a.name.local_name.to_lowercase() == "id" && a.value == id)
            },
            &mut out,
        );
        out
    }

    /// The element whose `Id` is `id`, or `None` when no element or more
    /// than one element carries it.
    pub fn find_by_id(&self, id: &str) -> Option<NodePath> {
        let mut found = self.find_all_by_id(id);
        if found.len() == 1 {
            found.pop()
        } else {
            None
        }
    }

    /// Direct element children of `path` with the given name.
    pub fn child_elements(&self, path: &NodePath, namespace: &str, local_name: &str) -> Vec<NodePath> {
        match self.element(path) {
            Some(element) => element
                .children
                .iter()
                .enumerate()
                .filter_map(|(i, child)| match child {
                    Node::Element(e) if e.is(namespace, local_name) => Some(path.child(i)),
                    _ => None,
                })
                .collect(),
            None => vec![],
        }
    }

    pub fn text(&self, path: &NodePath) -> Option<String> {
        self.element(path).map(Element::text)
    }

    pub fn set_text(&mut self, path: &NodePath, text: &str) -> Result<()> {
        let element = self.existing_mut(path)?;
        element.children = vec![Node::Text(text.to_string())];
        Ok(())
    }

    /// Sets an attribute, declaring its namespace on the element when the
    /// prefix is not already bound to it.
    pub fn set_attribute(&mut self, path: &NodePath, name: OwnedName, value: &str) -> Result<()> {
        let scope = self.in_scope(path);
        let element = self.existing_mut(path)?;

        if let (Some(prefix), Some(namespace)) = (&name.prefix, &name.namespace) {
            if scope.get(prefix.as_str()) != Some(namespace.as_str()) {
                element.declared.0.insert(prefix.clone(), namespace.clone());
            }
        }

        match element
            .attributes
            .iter_mut()
            .find(|a| a.name.namespace == name.namespace && a.name.local_name == name.local_name)
        {
            Some(existing) => existing.value = value.to_string(),
            None => element.attributes.push(OwnedAttribute::new(name, value)),
        }
        Ok(())
    }

    /// Namespace bindings in scope at `path`, including the element's own.
    pub fn in_scope(&self, path: &NodePath) -> Namespace {
        let mut scope = base_scope();
        let mut current = &self.root;
        extend_scope(&mut scope, &current.declared);
        for &i in &path.0 {
            match current.children.get(i) {
                Some(Node::Element(e)) => {
                    current = e;
                    extend_scope(&mut scope, &current.declared);
                }
                _ => break,
            }
        }
        scope
    }

    /// Removes an element from the tree. The returned element declares every
    /// namespace that was in scope for it, so it can be attached elsewhere.
    pub fn detach(&mut self, path: &NodePath) -> Result<Element> {
        let parent_path = path
            .parent()
            .ok_or_else(|| Error::MissingNode("cannot detach the document root".to_string()))?;
        let index = path.0.last().copied().unwrap_or_default();
        let scope = self.in_scope(path);
        let base = base_scope();

        let parent = self.existing_mut(&parent_path)?;
        if index >= parent.children.len() {
            return Err(Error::MissingNode(format!("no element at {:?}", path)));
        }
        let mut element = match parent.children.remove(index) {
            Node::Element(e) => e,
            text => {
                parent.children.insert(index, text);
                return Err(Error::MissingNode(format!("no element at {:?}", path)));
            }
        };
        element.declared = Namespace(
            scope
                .0
                .into_iter()
                .filter(|(prefix, uri)| base.get(prefix.as_str()) != Some(uri.as_str()))
                .collect(),
        );
        Ok(element)
    }

    pub fn append_child(&mut self, path: &NodePath, element: Element) -> Result<NodePath> {
        let parent = self.existing_mut(path)?;
        parent.children.push(Node::Element(element));
        Ok(path.child(parent.children.len() - 1))
    }

    /// xml-rs reader events for the subtree at `path`, each start element
    /// carrying its full in-scope namespace.
    pub fn events(&self, path: &NodePath) -> Result<Vec<XmlEvent>> {
        let element = self
            .element(path)
            .ok_or_else(|| Error::MissingNode(format!("no element at {:?}", path)))?;
        let scope = match path.parent() {
            Some(parent) => self.in_scope(&parent),
            None => base_scope(),
        };
        let mut out = vec![];
        push_events(element, &scope, &mut out);
        Ok(out)
    }

    pub fn to_xml(&self) -> Result<String> {
        crate::events_to_string(&self.events(&NodePath::root())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<a:Root xmlns:a="urn:a" xmlns:b="urn:b">
  <b:Child Id="one">first</b:Child>
  <a:Other><b:Child>second</b:Child></a:Other>
</a:Root>"#;

    #[test]
    fn finds_elements_in_document_order() {
        let doc = Document::parse(SOURCE).unwrap();
        let found = doc.find_all("urn:b", "Child");
        assert_eq!(found.len(), 2);
        assert_eq!(doc.text(&found[0]).unwrap(), "first");
        assert_eq!(doc.text(&found[1]).unwrap(), "second");
        assert_eq!(doc.find_by_id("one"), Some(found[0].clone()));
    }

    #[test]
    fn duplicated_id_does_not_resolve() {
        let doc = Document::parse(
            r#"<a:Root xmlns:a="urn:a"><a:One Id="x"/><a:Two><a:Three wsu:Id="x" xmlns:wsu="urn:u"/></a:Two></a:Root>"#,
        )
        .unwrap();
        assert_eq!(doc.find_all_by_id("x").len(), 2);
        assert!(doc.find_by_id("x").is_none());
    }

    #[test]
    fn child_elements_skip_descendants() {
        let doc = Document::parse(SOURCE).unwrap();
        let children = doc.child_elements(&NodePath::root(), "urn:b", "Child");
        assert_eq!(children.len(), 1);
        assert_eq!(doc.text(&children[0]).unwrap(), "first");
    }

    #[test]
    fn declarations_stay_on_declaring_element() {
        let doc = Document::parse(SOURCE).unwrap();
        assert_eq!(doc.root().declared.get("a"), Some("urn:a"));
        let child = doc.element(&doc.find("urn:b", "Child").unwrap()).unwrap();
        assert!(child.declared.0.is_empty());
    }

    #[test]
    fn detached_element_keeps_namespaces() {
        let mut doc = Document::parse(SOURCE).unwrap();
        let other = doc.find("urn:a", "Other").unwrap();
        let element = doc.detach(&other).unwrap();
        assert_eq!(element.declared.get("a"), Some("urn:a"));
        assert_eq!(element.declared.get("b"), Some("urn:b"));
        assert!(doc.find("urn:a", "Other").is_none());

        let mut target = Document::parse(r#"<x:Host xmlns:x="urn:x"/>"#).unwrap();
        let attached = target.append_child(&NodePath::root(), element).unwrap();
        assert!(target.element(&attached).unwrap().is("urn:a", "Other"));
        let reparsed = Document::parse(&target.to_xml().unwrap()).unwrap();
        assert_eq!(
            reparsed.text(&reparsed.find("urn:b", "Child").unwrap()).unwrap(),
            "second"
        );
    }

    #[test]
    fn set_attribute_declares_unbound_prefix() {
        let mut doc = Document::parse(SOURCE).unwrap();
        let path = doc.find("urn:a", "Other").unwrap();
        let name = OwnedName {
            local_name: "Id".to_string(),
            namespace: Some("urn:u".to_string()),
            prefix: Some("u".to_string()),
        };
        doc.set_attribute(&path, name, "other-1").unwrap();
        let element = doc.element(&path).unwrap();
        assert_eq!(element.attribute(Some("urn:u"), "Id"), Some("other-1"));
        assert_eq!(element.declared.get("u"), Some("urn:u"));
        assert!(doc.to_xml().unwrap().contains(r#"xmlns:u="urn:u""#));
    }

    #[test]
    fn malformed_xml_is_rejected() {
        assert!(matches!(
            Document::parse("<a><b></a>"),
            Err(Error::Canonicalization(_))
        ));
    }

    #[test]
    fn missing_template_is_a_load_error() {
        let err = Document::load(std::path::Path::new("/nonexistent/header.xml")).unwrap_err();
        assert!(matches!(err, Error::TemplateLoad { .. }));
    }
}
