//! Problem specification: column roles and the derivations over them.

use crate::error::{Result, SolverError};
use crate::preprocessing::date_offset::DateOffset;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Index column installed when a problem declares none
pub const DEFAULT_INDEX: &str = "d3mIndex";

/// Search keywords derived from a problem
pub mod keywords {
    pub const REGRESSION: &str = "REGRESSION";
    pub const CLASSIFICATION: &str = "CLASSIFICATION";
    pub const UNDETERMINED_TASK: &str = "UNDETERMINED_TASK";
    pub const UNIVARIATE: &str = "UNIVARIATE";
    pub const MULTIVARIATE: &str = "MULTIVARIATE";
    pub const FORECASTING: &str = "FORECASTING";
    pub const PREDICTION: &str = "PREDICTION";
    pub const BINARY: &str = "BINARY";
    pub const MULTICLASS: &str = "MULTICLASS";
    pub const MULTILABEL: &str = "MULTILABEL";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskType {
    Classification,
    Regression,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Classification => keywords::CLASSIFICATION,
            TaskType::Regression => keywords::REGRESSION,
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ForecastingHorizon {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeGranularity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub units: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

/// Declarative description of a predictive task.
///
/// Deserialized from the problem JSON (`targets`, `predictors`, `indexes`,
/// `categorical`, `crossSection`, `exogenous`, `weights`, `forecasting`,
/// `forecastingHorizon`, `date_format`, `timeGranularity`,
/// `performanceMetric`, `keywords`). Unknown members are preserved in
/// `extra` so a specification survives a save/load cycle unchanged.
///
/// Role accessors are set-based: they deduplicate, and the order of the
/// lists they return carries no meaning beyond being deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProblemSpecification {
    #[serde(default)]
    targets: Vec<String>,
    #[serde(default)]
    predictors: Vec<Option<String>>,
    #[serde(default)]
    indexes: Vec<String>,
    #[serde(default, rename = "categorical")]
    categoricals: Vec<String>,
    #[serde(default, rename = "crossSection")]
    cross_sections: Vec<String>,
    #[serde(default)]
    exogenous: Vec<String>,
    #[serde(default)]
    weights: Vec<String>,
    #[serde(default)]
    forecasting: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    forecasting_horizon: Option<ForecastingHorizon>,
    #[serde(default, rename = "date_format", skip_serializing_if = "BTreeMap::is_empty")]
    date_format: BTreeMap<String, String>,
    #[serde(default, rename = "date_offset_unit", skip_serializing_if = "BTreeMap::is_empty")]
    date_offset_unit: BTreeMap<String, Value>,
    #[serde(default, rename = "date_offset_start", skip_serializing_if = "BTreeMap::is_empty")]
    date_offset_start: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    time_granularity: Option<TimeGranularity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    performance_metric: Option<Value>,
    #[serde(default)]
    keywords: Vec<String>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

fn dedup_sorted<I: IntoIterator<Item = String>>(items: I) -> Vec<String> {
    items.into_iter().collect::<BTreeSet<_>>().into_iter().collect()
}

impl ProblemSpecification {
    /// Parse a problem from JSON. Shape errors (e.g. a column list given as
    /// a string) are reported as invalid specifications.
    pub fn from_value(value: Value) -> Result<Self> {
        let problem: Self = serde_json::from_value(value)
            .map_err(|e| SolverError::invalid(format!("problem specification: {}", e)))?;
        Ok(problem.normalized())
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(json)
            .map_err(|e| SolverError::invalid(format!("problem specification: {}", e)))?;
        Self::from_value(value)
    }

    /// Install defaults: the synthetic index when none is declared, and a
    /// bare `ordering` member as the forecasting horizon column.
    fn normalized(mut self) -> Self {
        if self.indexes.is_empty() {
            self.indexes = vec![DEFAULT_INDEX.to_string()];
        }
        if let Some(Value::String(ordering)) = self.extra.remove("ordering") {
            self.set_ordering(&ordering);
        }
        self
    }

    pub fn builder() -> ProblemSpecificationBuilder {
        ProblemSpecificationBuilder::default()
    }

    pub fn targets(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        self.targets
            .iter()
            .filter(|t| seen.insert(t.as_str()))
            .cloned()
            .collect()
    }

    pub fn indexes(&self) -> Vec<String> {
        if self.indexes.is_empty() {
            return vec![DEFAULT_INDEX.to_string()];
        }
        self.indexes.clone()
    }

    pub fn cross_sections(&self) -> Vec<String> {
        self.cross_sections.clone()
    }

    pub fn clear_cross_sections(&mut self) {
        self.cross_sections.clear();
    }

    pub fn is_forecasting(&self) -> bool {
        self.forecasting
    }

    /// Declared categoricals; cross-sections count as categorical outside forecasting.
    pub fn categoricals(&self) -> Vec<String> {
        let mut names = self.categoricals.clone();
        if !self.forecasting {
            names.extend(self.cross_sections.iter().cloned());
        }
        dedup_sorted(names)
    }

    pub fn weighting(&self) -> Option<String> {
        self.weights.first().cloned()
    }

    /// Exogenous columns, excluding cross-sections
    pub fn exogenous(&self) -> Vec<String> {
        dedup_sorted(
            self.exogenous
                .iter()
                .filter(|e| !self.cross_sections.contains(e))
                .cloned(),
        )
    }

    /// Time-ordering column of a forecasting problem.
    ///
    /// An explicit horizon column wins; otherwise the sole index is used
    /// when it is not categorical. Anything else is indeterminate.
    pub fn ordering(&self) -> Result<Option<String>> {
        if !self.forecasting {
            return Ok(None);
        }
        if let Some(column) = self
            .forecasting_horizon
            .as_ref()
            .and_then(|h| h.column.clone())
        {
            return Ok(Some(column));
        }

        let indexes = self.indexes();
        if indexes.len() > 1 {
            return Err(SolverError::invalid(
                "ordering is indeterminate: no forecasting column given, and multiple indexes given",
            ));
        }
        let order_name = indexes[0].clone();
        if self.categoricals().contains(&order_name) {
            return Err(SolverError::invalid(
                "ordering is indeterminate: no forecasting column given, and index is categorical",
            ));
        }
        Ok(Some(order_name))
    }

    pub fn set_ordering(&mut self, name: &str) {
        self.forecasting_horizon
            .get_or_insert_with(ForecastingHorizon::default)
            .column = Some(name.to_string());
    }

    /// Deduplicated predictors without the weighting and ordering columns.
    /// Cross-sections are folded in outside forecasting and removed inside it.
    pub fn predictors(&self) -> Result<Vec<String>> {
        let weighting = self.weighting();
        let ordering = self.ordering()?;

        let mut predictors: BTreeSet<String> = self.predictors.iter().flatten().cloned().collect();
        if let Some(w) = &weighting {
            predictors.remove(w);
        }
        if let Some(o) = &ordering {
            predictors.remove(o);
        }
        if self.forecasting {
            for cs in &self.cross_sections {
                predictors.remove(cs);
            }
        } else {
            predictors.extend(self.cross_sections.iter().cloned());
        }
        Ok(predictors.into_iter().collect())
    }

    pub fn endogenous(&self) -> Result<Vec<String>> {
        let exogenous = self.exogenous();
        Ok(self
            .predictors()?
            .into_iter()
            .filter(|p| !self.cross_sections.contains(p) && !exogenous.contains(p))
            .collect())
    }

    /// Model outputs: targets plus the ordering column
    pub fn y(&self) -> Result<Vec<String>> {
        let mut names = self.targets();
        names.extend(self.ordering()?);
        Ok(dedup_sorted(names))
    }

    /// Model inputs use the same columns as the training data
    pub fn x(&self) -> Result<Vec<String>> {
        self.train()
    }

    /// Columns expected at inference time
    pub fn test(&self) -> Result<Vec<String>> {
        let mut names = self.indexes();
        names.extend(self.predictors()?);
        names.extend(self.ordering()?);
        names.extend(self.cross_sections.iter().cloned());
        Ok(dedup_sorted(names))
    }

    /// Columns expected at fit time
    pub fn train(&self) -> Result<Vec<String>> {
        let mut names = self.test()?;
        names.extend(self.targets());
        names.extend(self.weighting());
        Ok(dedup_sorted(names))
    }

    /// Classification when every target is categorical, regression when none is
    pub fn task(&self) -> Option<TaskType> {
        let categoricals = self.categoricals();
        let targets = self.targets();
        if targets.iter().all(|t| categoricals.contains(t)) {
            return Some(TaskType::Classification);
        }
        if !targets.iter().any(|t| categoricals.contains(t)) {
            return Some(TaskType::Regression);
        }
        None
    }

    /// Task, arity and mode keywords plus any user-supplied keywords
    pub fn keywords(&self) -> Vec<String> {
        let task = self
            .task()
            .map_or(keywords::UNDETERMINED_TASK, |t| t.as_str());
        let arity = if self.targets().len() > 1 {
            keywords::MULTIVARIATE
        } else {
            keywords::UNIVARIATE
        };
        let mode = if self.forecasting {
            keywords::FORECASTING
        } else {
            keywords::PREDICTION
        };

        let mut out = vec![task.to_string(), arity.to_string(), mode.to_string()];
        out.extend(self.keywords.iter().cloned());
        out
    }

    pub fn date_format(&self, name: &str) -> Option<&str> {
        self.date_format.get(name).map(String::as_str)
    }

    pub fn set_date_format(&mut self, name: &str, date_format: &str) {
        self.date_format
            .insert(name.to_string(), date_format.to_string());
    }

    pub fn date_offset_start(&self, name: &str) -> Option<&str> {
        self.date_offset_start.get(name).map(String::as_str)
    }

    pub fn date_offset_unit(&self, name: &str) -> Result<Option<DateOffset>> {
        self.date_offset_unit
            .get(name)
            .map(DateOffset::standardize)
            .transpose()
    }

    /// Cadence requested through `timeGranularity`
    pub fn resample_date_offset_unit(&self) -> Result<Option<DateOffset>> {
        let Some(granularity) = &self.time_granularity else {
            return Ok(None);
        };
        let Some(units) = &granularity.units else {
            return Ok(None);
        };
        if matches!(units, Value::String(s) if s.is_empty()) {
            return Ok(None);
        }
        let value = granularity.value.unwrap_or(1.0);
        match units {
            Value::String(unit) => DateOffset::from_unit(unit, value).map(Some),
            other => {
                let base = DateOffset::standardize(other)?;
                if value.fract() != 0.0 {
                    return Err(SolverError::invalid(
                        "timeGranularity value must be integral for compound units",
                    ));
                }
                Ok(Some(base * value as i64))
            }
        }
    }

    pub fn performance_metric(&self) -> Option<&Value> {
        self.performance_metric.as_ref()
    }

    pub fn set_performance_metric(&mut self, metric: Value) {
        self.performance_metric = Some(metric);
    }
}

/// Builder used by tests and the CLI
#[derive(Debug, Default)]
pub struct ProblemSpecificationBuilder {
    spec: ProblemSpecification,
}

impl ProblemSpecificationBuilder {
    pub fn targets<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.spec.targets = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn predictors<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.spec.predictors = names.into_iter().map(|n| Some(n.into())).collect();
        self
    }

    pub fn indexes<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.spec.indexes = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn categoricals<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.spec.categoricals = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn cross_sections<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.spec.cross_sections = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn exogenous<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.spec.exogenous = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn weights(mut self, name: &str) -> Self {
        self.spec.weights = vec![name.to_string()];
        self
    }

    pub fn forecasting(mut self, forecasting: bool) -> Self {
        self.spec.forecasting = forecasting;
        self
    }

    pub fn ordering(mut self, name: &str) -> Self {
        self.spec.set_ordering(name);
        self
    }

    pub fn date_format(mut self, column: &str, format: &str) -> Self {
        self.spec.set_date_format(column, format);
        self
    }

    pub fn date_offset_unit(mut self, column: &str, unit: Value) -> Self {
        self.spec.date_offset_unit.insert(column.to_string(), unit);
        self
    }

    pub fn date_offset_start(mut self, column: &str, start: &str) -> Self {
        self.spec
            .date_offset_start
            .insert(column.to_string(), start.to_string());
        self
    }

    pub fn time_granularity(mut self, units: Value, value: f64) -> Self {
        self.spec.time_granularity = Some(TimeGranularity {
            units: Some(units),
            value: Some(value),
        });
        self
    }

    pub fn keywords<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.spec.keywords = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn build(self) -> ProblemSpecification {
        self.spec.normalized()
    }
}
