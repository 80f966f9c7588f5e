use std::cmp::Ordering;

use bson::{doc, Bson, Document};

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Field equals the value; on array fields, the array holds it.
    Equal(String, Bson),
    In(String, Vec<Bson>),
    /// Array field holds the value.
    Contains(String, Bson),
}

impl Filter {
    pub fn equal(field: &str, value: impl Into<Bson>) -> Self {
        Filter::Equal(field.to_string(), value.into())
    }

    pub fn is_in<V: Into<Bson>>(field: &str, values: impl IntoIterator<Item = V>) -> Self {
        Filter::In(field.to_string(), values.into_iter().map(Into::into).collect())
    }

    pub fn contains(field: &str, value: impl Into<Bson>) -> Self {
        Filter::Contains(field.to_string(), value.into())
    }

    pub fn to_document(&self) -> Document {
        match self {
            Filter::Equal(field, value) => doc! { field.as_str(): value.clone() },
            Filter::In(field, values) => doc! { field.as_str(): { "$in": values.clone() } },
            Filter::Contains(field, value) => {
                doc! { field.as_str(): { "$elemMatch": { "$eq": value.clone() } } }
            }
        }
    }

    pub fn matches(&self, document: &Document) -> bool {
        match self {
            Filter::Equal(field, value) => equals(document.get(field), value),
            Filter::In(field, values) => values.iter().any(|v| equals(document.get(field), v)),
            Filter::Contains(field, value) => match document.get(field) {
                Some(Bson::Array(items)) => items.contains(value),
                _ => false,
            },
        }
    }
}

fn equals(actual: Option<&Bson>, expected: &Bson) -> bool {
    match (actual, expected) {
        (None, Bson::Null) => true,
        (Some(Bson::Array(items)), expected) if !matches!(expected, Bson::Array(_)) => {
            items.contains(expected)
        }
        (Some(actual), expected) => actual == expected,
        (None, _) => false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Default)]
pub struct Query {
    pub filters: Vec<Filter>,
    pub sort: Option<(String, SortOrder)>,
    pub limit: Option<u64>,
    pub offset: u64,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn order_asc(mut self, field: &str) -> Self {
        self.sort = Some((field.to_string(), SortOrder::Asc));
        self
    }

    pub fn order_desc(mut self, field: &str) -> Self {
        self.sort = Some((field.to_string(), SortOrder::Desc));
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    /// MongoDB filter document; every filter must hold.
    pub fn filter_document(&self) -> Document {
        match self.filters.as_slice() {
            [] => Document::new(),
            [only] => only.to_document(),
            many => {
                let clauses: Vec<Bson> =
                    many.iter().map(|f| Bson::Document(f.to_document())).collect();
                doc! { "$and": clauses }
            }
        }
    }

    pub fn sort_document(&self) -> Option<Document> {
        self.sort.as_ref().map(|(field, order)| {
            let direction = match order {
                SortOrder::Asc => 1,
                SortOrder::Desc => -1,
            };
            doc! { field.as_str(): direction }
        })
    }

    pub fn matches(&self, document: &Document) -> bool {
        self.filters.iter().all(|f| f.matches(document))
    }

    /// Orders documents the way the query's sort asks. Ties keep their
    /// incoming order ascending and reverse it descending, so a descending
    /// listing is the exact mirror of the ascending one.
    pub fn sort_documents(&self, documents: &mut [Document]) {
        if let Some((field, order)) = &self.sort {
            documents.sort_by(|a, b| compare_bson(a.get(field), b.get(field)));
            if *order == SortOrder::Desc {
                documents.reverse();
            }
        }
    }
}

fn compare_bson(a: Option<&Bson>, b: Option<&Bson>) -> Ordering {
    match (a, b) {
        (None | Some(Bson::Null), None | Some(Bson::Null)) => Ordering::Equal,
        (None | Some(Bson::Null), _) => Ordering::Less,
        (_, None | Some(Bson::Null)) => Ordering::Greater,
        (Some(Bson::DateTime(x)), Some(Bson::DateTime(y))) => x.cmp(y),
        (Some(Bson::String(x)), Some(Bson::String(y))) => x.cmp(y),
        (Some(Bson::ObjectId(x)), Some(Bson::ObjectId(y))) => x.cmp(y),
        (Some(Bson::Boolean(x)), Some(Bson::Boolean(y))) => x.cmp(y),
        (Some(x), Some(y)) => match (as_f64(x), as_f64(y)) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            _ => Ordering::Equal,
        },
    }
}

fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(v) => Some(f64::from(*v)),
        Bson::Int64(v) => Some(*v as f64),
        Bson::Double(v) => Some(*v),
        _ => None,
    }
}
