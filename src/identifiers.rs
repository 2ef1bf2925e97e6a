use std::fmt::{Display, Formatter};

use indexmap::IndexSet;

use crate::iso::{
    disclosure::Document,
    mdocs::{DataElementIdentifier, DocType, NameSpace},
};

/// Uniquely identifies an attribute within a document type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttributeIdentifier {
    pub doc_type: DocType,
    pub namespace: NameSpace,
    pub attribute: DataElementIdentifier,
}

impl Display for AttributeIdentifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.doc_type, self.namespace, self.attribute)
    }
}

/// Anything that contains a set of attributes, identified by
/// [`AttributeIdentifier`]s.
pub trait AttributeIdentifierHolder {
    fn attribute_identifiers(&self) -> IndexSet<AttributeIdentifier>;
}

impl AttributeIdentifierHolder for Document {
    fn attribute_identifiers(&self) -> IndexSet<AttributeIdentifier> {
        self.issuer_signed
            .name_spaces
            .as_ref()
            .map(|name_spaces| {
                name_spaces
                    .iter()
                    .flat_map(|(namespace, attributes)| {
                        attributes.as_ref().iter().map(|attribute| AttributeIdentifier {
                            doc_type: self.doc_type.clone(),
                            namespace: namespace.clone(),
                            attribute: attribute.as_ref().element_identifier.clone(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}
