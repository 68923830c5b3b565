use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tapor_core::{CustomerId, DomainError, DomainResult, Entity};

/// Maximum length of a national identification number.
pub const NATIONAL_ID_MAX_LEN: usize = 10;

const NAME_MAX_LEN: usize = 100;
const PHONE_MAX_LEN: usize = 20;

/// Persisted customer record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub id: CustomerId,
    pub first_name: String,
    pub last_name: String,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub national_id: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Customer {
    /// Build a record from validated input.
    pub fn from_new(id: CustomerId, input: NewCustomer, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            first_name: input.first_name.trim().to_string(),
            last_name: input.last_name.trim().to_string(),
            address: input.address,
            phone: input.phone,
            national_id: input.national_id,
            notes: input.notes,
            created_at,
        }
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    /// Case-insensitive substring match over the full name.
    pub fn matches_search(&self, needle: &str) -> bool {
        let needle = needle.trim();
        if needle.is_empty() {
            return true;
        }
        self.full_name()
            .to_lowercase()
            .contains(&needle.to_lowercase())
    }
}

impl Entity for Customer {
    type Id = CustomerId;

    fn id(&self) -> Self::Id {
        self.id
    }
}

/// Input for registering a customer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCustomer {
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub national_id: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl NewCustomer {
    pub fn validate(&self) -> DomainResult<()> {
        required_name("firstName", &self.first_name)?;
        required_name("lastName", &self.last_name)?;

        if let Some(phone) = &self.phone {
            if phone.chars().count() > PHONE_MAX_LEN {
                return Err(DomainError::invalid_field(
                    "phone",
                    format!("must be at most {PHONE_MAX_LEN} characters"),
                ));
            }
        }

        if let Some(national_id) = &self.national_id {
            if national_id.len() > NATIONAL_ID_MAX_LEN
                || !national_id.chars().all(|c| c.is_ascii_digit())
            {
                return Err(DomainError::invalid_field(
                    "nationalId",
                    format!("must be up to {NATIONAL_ID_MAX_LEN} digits"),
                ));
            }
        }

        Ok(())
    }
}

fn required_name(field: &str, value: &str) -> DomainResult<()> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(DomainError::invalid_field(field, "cannot be empty"));
    }
    if trimmed.chars().count() > NAME_MAX_LEN {
        return Err(DomainError::invalid_field(
            field,
            format!("must be at most {NAME_MAX_LEN} characters"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_customer() -> NewCustomer {
        NewCustomer {
            first_name: "Sara".to_string(),
            last_name: "Karimi".to_string(),
            phone: Some("09120000000".to_string()),
            national_id: Some("0012345678".to_string()),
            ..NewCustomer::default()
        }
    }

    #[test]
    fn valid_customer_passes() {
        assert!(new_customer().validate().is_ok());
    }

    #[test]
    fn rejects_blank_first_name() {
        let mut input = new_customer();
        input.first_name = "   ".to_string();
        let err = input.validate().unwrap_err();
        assert_eq!(err.field(), Some("firstName"));
    }

    #[test]
    fn rejects_non_numeric_national_id() {
        let mut input = new_customer();
        input.national_id = Some("12-34".to_string());
        let err = input.validate().unwrap_err();
        assert_eq!(err.field(), Some("nationalId"));
    }

    #[test]
    fn rejects_long_national_id() {
        let mut input = new_customer();
        input.national_id = Some("12345678901".to_string());
        assert!(input.validate().is_err());
    }

    #[test]
    fn search_matches_across_first_and_last_name() {
        let customer = Customer::from_new(CustomerId::new(), new_customer(), Utc::now());
        assert!(customer.matches_search("ra kar"));
        assert!(customer.matches_search("KARIMI"));
        assert!(customer.matches_search(""));
        assert!(!customer.matches_search("ahmadi"));
    }

    #[test]
    fn from_new_trims_names() {
        let mut input = new_customer();
        input.first_name = "  Sara ".to_string();
        let customer = Customer::from_new(CustomerId::new(), input, Utc::now());
        assert_eq!(customer.full_name(), "Sara Karimi");
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 256,
                ..ProptestConfig::default()
            })]

            /// Property: a record always matches a search for its own full name.
            #[test]
            fn full_name_always_matches_itself(
                first in "[A-Za-z]{1,30}",
                last in "[A-Za-z]{1,30}",
            ) {
                let input = NewCustomer {
                    first_name: first,
                    last_name: last,
                    ..NewCustomer::default()
                };
                prop_assert!(input.validate().is_ok());
                let customer = Customer::from_new(CustomerId::new(), input, Utc::now());
                prop_assert!(customer.matches_search(&customer.full_name()));
            }

            /// Property: any all-digit national id up to the limit is accepted.
            #[test]
            fn digit_national_ids_accepted(id in "[0-9]{1,10}") {
                let input = NewCustomer {
                    first_name: "A".to_string(),
                    last_name: "B".to_string(),
                    national_id: Some(id),
                    ..NewCustomer::default()
                };
                prop_assert!(input.validate().is_ok());
            }
        }
    }
}
