//! Consolidated identity views returned to callers.

use serde::{Deserialize, Serialize};

use crate::contact::{Contact, ContactId};

/// One identity: its primary, every distinct signal, and every secondary.
///
/// `emails` and `phone_numbers` list the primary's own value first (when it
/// has one), followed by each distinct secondary value in the order the
/// secondaries were fetched. Absent values are never listed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityView {
    pub primary_contact_id: ContactId,
    pub emails: Vec<String>,
    pub phone_numbers: Vec<String>,
    pub secondary_contact_ids: Vec<ContactId>,
}

fn collect_distinct<'a>(
    first: Option<&'a str>,
    rest: impl Iterator<Item = Option<&'a str>>,
) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for value in std::iter::once(first).chain(rest).flatten() {
        if !out.iter().any(|seen| seen == value) {
            out.push(value.to_string());
        }
    }
    out
}

impl IdentityView {
    /// Builds the view of an identity from its primary and its secondaries.
    #[must_use]
    pub fn from_identity(primary: &Contact, secondaries: &[Contact]) -> Self {
        Self {
            primary_contact_id: primary.id,
            emails: collect_distinct(
                primary.email.as_deref(),
                secondaries.iter().map(|c| c.email.as_deref()),
            ),
            phone_numbers: collect_distinct(
                primary.phone_number.as_deref(),
                secondaries.iter().map(|c| c.phone_number.as_deref()),
            ),
            secondary_contact_ids: secondaries.iter().map(|c| c.id).collect(),
        }
    }

    /// View of an identity that has no secondaries.
    #[must_use]
    pub fn singleton(primary: &Contact) -> Self {
        Self::from_identity(primary, &[])
    }
}

/// Response envelope handed back to the request-handling layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifyResponse {
    pub contact: IdentityView,
}

impl From<IdentityView> for IdentifyResponse {
    fn from(contact: IdentityView) -> Self {
        Self { contact }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contact::NewContact;
    use chrono::Utc;

    fn contact(id: u64, draft: NewContact) -> Contact {
        Contact::from_draft(ContactId::new(id), draft, Utc::now())
    }

    fn opt(s: &str) -> Option<String> {
        Some(s.to_string())
    }

    #[test]
    fn test_singleton_view() {
        let p = contact(1, NewContact::primary(opt("a@x.com"), None));
        let view = IdentityView::singleton(&p);
        assert_eq!(view.primary_contact_id, ContactId::new(1));
        assert_eq!(view.emails, vec!["a@x.com"]);
        assert!(view.phone_numbers.is_empty());
        assert!(view.secondary_contact_ids.is_empty());
    }

    #[test]
    fn test_primary_values_first_then_distinct() {
        let primary_id = ContactId::new(1);
        let p = contact(1, NewContact::primary(opt("lorraine@hillvalley.edu"), opt("123456")));
        let secondaries = vec![
            contact(
                23,
                NewContact::secondary(opt("mcfly@hillvalley.edu"), opt("123456"), primary_id),
            ),
            contact(
                24,
                NewContact::secondary(opt("lorraine@hillvalley.edu"), opt("717171"), primary_id),
            ),
            contact(
                25,
                NewContact::secondary(opt("mcfly@hillvalley.edu"), opt("717171"), primary_id),
            ),
        ];

        let view = IdentityView::from_identity(&p, &secondaries);
        assert_eq!(
            view.emails,
            vec!["lorraine@hillvalley.edu", "mcfly@hillvalley.edu"]
        );
        assert_eq!(view.phone_numbers, vec!["123456", "717171"]);
        assert_eq!(
            view.secondary_contact_ids,
            vec![ContactId::new(23), ContactId::new(24), ContactId::new(25)]
        );
    }

    #[test]
    fn test_absent_primary_value_is_skipped() {
        let primary_id = ContactId::new(1);
        let p = contact(1, NewContact::primary(None, opt("111")));
        let secondaries = vec![contact(
            2,
            NewContact::secondary(opt("b@x.com"), None, primary_id),
        )];
        let view = IdentityView::from_identity(&p, &secondaries);
        assert_eq!(view.emails, vec!["b@x.com"]);
        assert_eq!(view.phone_numbers, vec!["111"]);
    }

    #[test]
    fn test_response_envelope_json_shape() {
        let p = contact(1, NewContact::primary(opt("a@x.com"), opt("111")));
        let resp = IdentifyResponse::from(IdentityView::singleton(&p));
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["contact"]["primaryContactId"], 1);
        assert_eq!(json["contact"]["emails"][0], "a@x.com");
        assert_eq!(json["contact"]["phoneNumbers"][0], "111");
        assert!(json["contact"]["secondaryContactIds"].as_array().unwrap().is_empty());
    }
}
