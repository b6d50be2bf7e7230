use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    str::FromStr,
    sync::Arc,
};

/// Labels set on Kubernetes objects.
#[derive(Clone, Debug, Eq, Default)]
pub struct Labels(Arc<Map>);

pub type Map = BTreeMap<String, String>;

pub type Expressions = Vec<Expression>;

/// Label source of everything learned from the Kubernetes API.
pub const SOURCE_K8S: &str = "k8s";

/// Label source of labels parsed without an explicit source.
pub const SOURCE_UNSPEC: &str = "unspec";

/// Label source of agent-internal labels.
pub const SOURCE_RESERVED: &str = "reserved";

/// Label source that matches labels of every other source.
pub const SOURCE_ANY: &str = "any";

/// Label key holding a pod's namespace.
pub const POD_NAMESPACE_LABEL: &str = "io.kubernetes.pod.namespace";

/// Key prefix under which a namespace's labels are exposed on its endpoints.
pub const NAMESPACE_LABELS_PREFIX: &str = "io.cilium.k8s.namespace.labels";

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
pub struct Label {
    pub key: String,
    #[serde(default)]
    pub value: String,
    #[serde(default = "unspec_source")]
    pub source: String,
}

/// An ordered list of labels.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct LabelArray(Vec<Label>);

#[derive(Debug, thiserror::Error)]
pub enum ParseLabelError {
    #[error("label {0:?} has an empty key")]
    EmptyKey(String),

    #[error("invalid selector operator: {0}")]
    Operator(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Expression {
    pub key: String,
    pub operator: Operator,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub values: BTreeSet<String>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub enum Operator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

/// Selects a set of endpoints by their labels.
///
/// Keys are written as `<source>.<key>` or `<source>:<key>`; keys without a known source apply to
/// labels of any source.
#[derive(Clone, Debug, Eq, PartialEq, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Selector {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    match_labels: Option<Map>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    match_expressions: Option<Expressions>,
}

fn unspec_source() -> String {
    SOURCE_UNSPEC.to_string()
}

// === Selector ===

impl Selector {
    pub fn from_expressions(exprs: Expressions) -> Self {
        Self {
            match_labels: None,
            match_expressions: Some(exprs),
        }
    }

    pub fn from_map(map: Map) -> Self {
        Self {
            match_labels: Some(map),
            match_expressions: None,
        }
    }

    /// Converts a Kubernetes label selector, qualifying each key with `source`.
    pub fn from_label_selector(
        selector: &k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector,
        source: &str,
    ) -> Result<Self, ParseLabelError> {
        Self::from_label_selector_with_prefix(selector, source, None)
    }

    /// Converts a Kubernetes label selector, qualifying each key with `source` and a key prefix.
    pub fn from_label_selector_with_prefix(
        selector: &k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector,
        source: &str,
        prefix: Option<&str>,
    ) -> Result<Self, ParseLabelError> {
        let qualify = |key: &str| match prefix {
            Some(prefix) => format!("{source}.{prefix}.{key}"),
            None => format!("{source}.{key}"),
        };

        let match_labels = selector.match_labels.as_ref().map(|labels| {
            labels
                .iter()
                .map(|(k, v)| (qualify(k), v.clone()))
                .collect::<Map>()
        });

        let match_expressions = match selector.match_expressions.as_ref() {
            None => None,
            Some(reqs) => Some(
                reqs.iter()
                    .map(|req| {
                        Ok(Expression {
                            key: qualify(&req.key),
                            operator: req.operator.parse()?,
                            values: req.values.iter().flatten().cloned().collect(),
                        })
                    })
                    .collect::<Result<Expressions, ParseLabelError>>()?,
            ),
        };

        Ok(Self {
            match_labels,
            match_expressions,
        })
    }

    pub fn match_labels(&self) -> impl Iterator<Item = (&String, &String)> {
        self.match_labels.iter().flatten()
    }

    pub fn match_expressions(&self) -> impl Iterator<Item = &Expression> {
        self.match_expressions.iter().flatten()
    }

    /// Returns true if any term of the selector constrains `key`.
    pub fn constrains(&self, key: &str) -> bool {
        self.match_labels().any(|(k, _)| k == key) || self.match_expressions().any(|e| e.key == key)
    }

    /// Returns true if any term of the selector constrains a key starting with `prefix`.
    pub fn constrains_prefix(&self, prefix: &str) -> bool {
        self.match_labels().any(|(k, _)| k.starts_with(prefix))
            || self.match_expressions().any(|e| e.key.starts_with(prefix))
    }

    /// Adds (or overwrites) an equality term.
    pub fn insert_match_label(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.match_labels
            .get_or_insert_with(Map::new)
            .insert(key.into(), value.into());
    }

    pub fn insert_match_expression(&mut self, expr: Expression) {
        self.match_expressions
            .get_or_insert_with(Vec::new)
            .push(expr);
    }

    /// Adds every term of `other`, so that the result selects the intersection of both.
    pub fn extend(&mut self, other: Selector) {
        if let Some(labels) = other.match_labels {
            self.match_labels
                .get_or_insert_with(Map::new)
                .extend(labels);
        }
        if let Some(exprs) = other.match_expressions {
            self.match_expressions
                .get_or_insert_with(Vec::new)
                .extend(exprs);
        }
    }

    /// A selector without terms selects every endpoint.
    pub fn is_wildcard(&self) -> bool {
        self.match_labels().next().is_none() && self.match_expressions().next().is_none()
    }
}

impl std::iter::FromIterator<(String, String)> for Selector {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self::from_map(iter.into_iter().collect())
    }
}

impl std::iter::FromIterator<(&'static str, &'static str)> for Selector {
    fn from_iter<T: IntoIterator<Item = (&'static str, &'static str)>>(iter: T) -> Self {
        Self::from_map(
            iter.into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }
}

impl std::iter::FromIterator<Expression> for Selector {
    fn from_iter<T: IntoIterator<Item = Expression>>(iter: T) -> Self {
        Self::from_expressions(iter.into_iter().collect())
    }
}

// === Labels ===

impl Labels {
    pub fn from_meta(labels: Option<&Map>) -> Self {
        labels.cloned().map(Self::from).unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Map> for Labels {
    #[inline]
    fn from(labels: Map) -> Self {
        Self(Arc::new(labels))
    }
}

impl AsRef<Map> for Labels {
    #[inline]
    fn as_ref(&self) -> &Map {
        self.0.as_ref()
    }
}

impl<T: AsRef<Map>> std::cmp::PartialEq<T> for Labels {
    #[inline]
    fn eq(&self, t: &T) -> bool {
        self.0.as_ref().eq(t.as_ref())
    }
}

impl std::iter::FromIterator<(String, String)> for Labels {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(Arc::new(iter.into_iter().collect()))
    }
}

impl std::iter::FromIterator<(&'static str, &'static str)> for Labels {
    fn from_iter<T: IntoIterator<Item = (&'static str, &'static str)>>(iter: T) -> Self {
        iter.into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }
}

// === Operator ===

impl FromStr for Operator {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "In" => Ok(Self::In),
            "NotIn" => Ok(Self::NotIn),
            "Exists" => Ok(Self::Exists),
            "DoesNotExist" => Ok(Self::DoesNotExist),
            s => Err(ParseLabelError::Operator(s.to_string())),
        }
    }
}

// === Label ===

impl Label {
    pub fn new(key: impl Into<String>, value: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            source: source.into(),
        }
    }

    /// Returns true if `self`, used as a requirement, is satisfied by `other`.
    pub fn matches(&self, other: &Label) -> bool {
        (self.source == SOURCE_ANY || self.source == other.source)
            && self.key == other.key
            && self.value == other.value
    }

    /// The key under which this label is addressed by a `Selector`.
    pub fn selector_key(&self) -> String {
        format!("{}.{}", self.source, self.key)
    }
}

/// Parses `[source:]key[=value]`.
impl FromStr for Label {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (source, rest) = match s.find([':', '=']) {
            Some(i) if s.as_bytes()[i] == b':' => (&s[..i], &s[i + 1..]),
            _ => (SOURCE_UNSPEC, s),
        };
        let (key, value) = rest.split_once('=').unwrap_or((rest, ""));
        if key.is_empty() {
            return Err(ParseLabelError::EmptyKey(s.to_string()));
        }
        Ok(Self::new(key, value, source))
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source, self.key)?;
        if !self.value.is_empty() {
            write!(f, "={}", self.value)?;
        }
        Ok(())
    }
}

// === LabelArray ===

impl LabelArray {
    pub fn new(labels: Vec<Label>) -> Self {
        Self(labels)
    }

    /// Builds a label array from Kubernetes labels, in key order.
    pub fn from_map<'a>(labels: impl IntoIterator<Item = (&'a String, &'a String)>, source: &str) -> Self {
        labels
            .into_iter()
            .map(|(k, v)| Label::new(k.clone(), v.clone(), source))
            .collect()
    }

    pub fn parse<'a>(labels: impl IntoIterator<Item = &'a str>) -> Result<Self, ParseLabelError> {
        labels.into_iter().map(str::parse).collect()
    }

    /// Returns true if every label in `needed` is present in this array.
    pub fn contains(&self, needed: &LabelArray) -> bool {
        needed
            .0
            .iter()
            .all(|need| self.0.iter().any(|have| need.matches(have)))
    }

    /// Compares both arrays as sets.
    pub fn same_set(&self, other: &LabelArray) -> bool {
        let a = self.0.iter().collect::<BTreeSet<_>>();
        let b = other.0.iter().collect::<BTreeSet<_>>();
        a == b
    }

    /// Returns the labels for which `f` holds.
    pub fn filter(&self, f: impl Fn(&Label) -> bool) -> Self {
        self.0.iter().filter(|l| f(l)).cloned().collect()
    }

    pub fn push(&mut self, label: Label) {
        self.0.push(label);
    }

    pub fn extend(&mut self, labels: impl IntoIterator<Item = Label>) {
        self.0.extend(labels);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Label> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::iter::FromIterator<Label> for LabelArray {
    fn from_iter<T: IntoIterator<Item = Label>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for LabelArray {
    type Item = Label;
    type IntoIter = std::vec::IntoIter<Label>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a LabelArray {
    type Item = &'a Label;
    type IntoIter = std::slice::Iter<'a, Label>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for LabelArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, l) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            fmt::Display::fmt(l, f)?;
        }
        f.write_str("]")
    }
}
