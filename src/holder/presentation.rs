//! A minimal model of the DIF Presentation Exchange structures that OID4VP
//! requests carry: enough to decide which attributes of which document a
//! verifier is asking for.

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use crate::iso::mdocs::{DataElementIdentifier, NameSpace};

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PresentationDefinition {
    pub id: String,
    pub input_descriptors: Vec<InputDescriptor>,
}

impl PresentationDefinition {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// A request for one document. For mdoc presentations the descriptor `id` is
/// the requested document type.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct InputDescriptor {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
    pub constraints: Constraints,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Constraints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_disclosure: Option<LimitDisclosure>,
    #[serde(default)]
    pub fields: Vec<Field>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LimitDisclosure {
    Required,
    Preferred,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Field {
    pub path: Vec<String>,
    #[serde(default)]
    pub intent_to_retain: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
}

impl Field {
    /// The `(namespace, element)` pair this field selects, taken from the
    /// first path of the form `$['namespace']['element']`.
    pub fn element_path(&self) -> Option<(NameSpace, DataElementIdentifier)> {
        self.path.iter().find_map(|path| parse_element_path(path))
    }
}

impl InputDescriptor {
    /// All `(namespace, element)` pairs requested by this descriptor.
    pub fn requested_elements(&self) -> IndexSet<(NameSpace, DataElementIdentifier)> {
        self.constraints.fields.iter().filter_map(Field::element_path).collect()
    }
}

fn parse_element_path(path: &str) -> Option<(String, String)> {
    let rest = path.strip_prefix('$')?;
    let (namespace, rest) = parse_bracket_index(rest)?;
    let (element, rest) = parse_bracket_index(rest)?;
    rest.is_empty().then_some((namespace, element))
}

fn parse_bracket_index(s: &str) -> Option<(String, &str)> {
    let s = s.strip_prefix('[')?;
    let quote = s.chars().next().filter(|c| *c == '\'' || *c == '"')?;
    let s = &s[1..];
    let end = s.find(quote)?;
    let (name, s) = s.split_at(end);
    let s = s[1..].strip_prefix(']')?;
    (!name.is_empty()).then(|| (name.to_string(), s))
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("$['org.iso.18013.5.1']['family_name']", Some(("org.iso.18013.5.1", "family_name")))]
    #[case(r#"$["org.iso.18013.5.1"]["given_name"]"#, Some(("org.iso.18013.5.1", "given_name")))]
    #[case("$['ns']['elem']['too_deep']", None)]
    #[case("$['ns']", None)]
    #[case("$.vc.credentialSubject.family_name", None)]
    #[case("$['']['elem']", None)]
    fn parse_paths(#[case] path: &str, #[case] expected: Option<(&str, &str)>) {
        assert_eq!(
            parse_element_path(path),
            expected.map(|(ns, elem)| (ns.to_string(), elem.to_string())),
        );
    }

    #[test]
    fn requested_elements_from_definition() {
        let definition = PresentationDefinition::from_json(
            r#"{
                "id": "mdl-test-age-over-21",
                "input_descriptors": [
                    {
                        "id": "org.iso.18013.5.1.mDL",
                        "constraints": {
                            "limit_disclosure": "required",
                            "fields": [
                                {
                                    "path": ["$['org.iso.18013.5.1']['age_over_21']"],
                                    "intent_to_retain": false
                                },
                                {
                                    "path": ["$['org.iso.18013.5.1']['portrait']"],
                                    "intent_to_retain": true
                                }
                            ]
                        }
                    }
                ]
            }"#,
        )
        .unwrap();

        let descriptor = &definition.input_descriptors[0];
        assert_eq!(descriptor.constraints.limit_disclosure, Some(LimitDisclosure::Required));
        assert!(descriptor.constraints.fields[1].intent_to_retain);

        let requested = descriptor.requested_elements();
        assert_eq!(
            requested.into_iter().collect::<Vec<_>>(),
            [
                ("org.iso.18013.5.1".to_string(), "age_over_21".to_string()),
                ("org.iso.18013.5.1".to_string(), "portrait".to_string()),
            ],
        );
    }
}
