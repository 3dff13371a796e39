//! Map strategies: turn one batch of items into a parameter record.

use alphaload_types::ParamRecord;

use crate::errors::PlanError;

/// Build the API-call arguments for one batch.
pub trait MapStrategy<T>: Send + Sync {
    /// # Errors
    ///
    /// Returns [`PlanError::InvalidArgument`] when the batch has the wrong shape.
    fn map(&self, batch: &[T]) -> Result<ParamRecord, PlanError>;
}

/// `{start_key: first, end_key: last}` for a batch of dates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateRangeMap {
    pub start_key: String,
    pub end_key: String,
}

impl Default for DateRangeMap {
    fn default() -> Self {
        Self {
            start_key: "start_date".into(),
            end_key: "end_date".into(),
        }
    }
}

impl MapStrategy<String> for DateRangeMap {
    fn map(&self, batch: &[String]) -> Result<ParamRecord, PlanError> {
        let (Some(first), Some(last)) = (batch.first(), batch.last()) else {
            return Err(PlanError::InvalidArgument(
                "date range map needs a non-empty batch".into(),
            ));
        };
        Ok(ParamRecord::new()
            .with(self.start_key.clone(), first.clone())
            .with(self.end_key.clone(), last.clone()))
    }
}

/// `{key: code}` for a batch holding exactly one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SingleEntityMap {
    pub key: String,
}

impl Default for SingleEntityMap {
    fn default() -> Self {
        Self {
            key: "ts_code".into(),
        }
    }
}

impl MapStrategy<String> for SingleEntityMap {
    fn map(&self, batch: &[String]) -> Result<ParamRecord, PlanError> {
        match batch {
            [code] => Ok(ParamRecord::new().with(self.key.clone(), code.clone())),
            _ => Err(PlanError::InvalidArgument(format!(
                "single entity map needs exactly one item, got {}",
                batch.len()
            ))),
        }
    }
}

/// `{key: "a,b,c"}` for a batch of entities fetched in one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinedEntityMap {
    pub key: String,
    pub separator: String,
}

impl Default for JoinedEntityMap {
    fn default() -> Self {
        Self {
            key: "ts_code".into(),
            separator: ",".into(),
        }
    }
}

impl MapStrategy<String> for JoinedEntityMap {
    fn map(&self, batch: &[String]) -> Result<ParamRecord, PlanError> {
        if batch.is_empty() {
            return Err(PlanError::InvalidArgument(
                "joined entity map needs a non-empty batch".into(),
            ));
        }
        Ok(ParamRecord::new().with(self.key.clone(), batch.join(&self.separator)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(values: &[&str]) -> Vec<String> {
        values.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn date_range_uses_first_and_last() {
        let record = DateRangeMap::default()
            .map(&items(&["20230101", "20230102", "20230103"]))
            .unwrap();
        assert_eq!(record.get_str("start_date"), Some("20230101"));
        assert_eq!(record.get_str("end_date"), Some("20230103"));
        assert!(DateRangeMap::default().map(&Vec::<String>::new()).is_err());
    }

    #[test]
    fn single_entity_requires_one_item() {
        let record = SingleEntityMap::default().map(&items(&["600000.SH"])).unwrap();
        assert_eq!(record.get_str("ts_code"), Some("600000.SH"));
        assert!(SingleEntityMap::default()
            .map(&items(&["600000.SH", "000001.SZ"]))
            .is_err());
    }

    #[test]
    fn joined_entities_use_separator() {
        let record = JoinedEntityMap::default()
            .map(&items(&["600000.SH", "000001.SZ"]))
            .unwrap();
        assert_eq!(record.get_str("ts_code"), Some("600000.SH,000001.SZ"));
    }
}
