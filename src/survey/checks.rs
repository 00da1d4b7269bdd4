// Validation of candidate values against the lists of the configuration.

use std::collections::{HashMap, HashSet};

use vote_resolver::cache::ValidatorFactory;

use crate::survey::config_reader::InvalidValue;
use crate::survey::*;

/// Rejects a fixed set of values.
struct ValueList {
    values: HashSet<String>,
}

impl Validator for ValueList {
    fn is_invalid(&self, _: &str, _: ItemId, _: ItemId, value: &str) -> Result<bool, BoxError> {
        Ok(self.values.contains(value))
    }
}

/// Builds the list of rejected values of each locale: the values declared
/// for that locale plus the values declared for every locale.
pub struct ValueListFactory {
    everywhere: HashSet<String>,
    by_locale: HashMap<String, HashSet<String>>,
}

impl ValueListFactory {
    pub fn new(invalid: &[InvalidValue]) -> ValueListFactory {
        let mut everywhere = HashSet::new();
        let mut by_locale: HashMap<String, HashSet<String>> = HashMap::new();
        for iv in invalid {
            match &iv.locale {
                Some(l) => {
                    by_locale
                        .entry(l.clone())
                        .or_default()
                        .insert(iv.value.clone());
                }
                None => {
                    everywhere.insert(iv.value.clone());
                }
            }
        }
        ValueListFactory {
            everywhere,
            by_locale,
        }
    }
}

impl ValidatorFactory for ValueListFactory {
    fn build(&self, locale: &str) -> Result<Box<dyn Validator>, BoxError> {
        let mut values = self.everywhere.clone();
        if let Some(local) = self.by_locale.get(locale) {
            values.extend(local.iter().cloned());
        }
        debug!("validator for {}: {} rejected values", locale, values.len());
        Ok(Box::new(ValueList { values }))
    }
}
