//! Splits an instrument list into size-bounded subscription requests.

use serde_json::{json, Value};
use std::num::NonZeroUsize;

/// View type understood by the feed for "list of field ids".
pub const VIEW_TYPE_FIELD_ID_LIST: u32 = 1;

/// Field subset applied to every batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldView {
    /// View type sent as `:ViewType`.
    pub view_type: u32,
    /// Field ids sent as `:ViewData`, in order.
    pub field_ids: Vec<u32>,
}

impl FieldView {
    /// Field-id-list view over `field_ids`.
    pub fn from_field_ids(field_ids: impl IntoIterator<Item = u32>) -> Self {
        Self {
            view_type: VIEW_TYPE_FIELD_ID_LIST,
            field_ids: field_ids.into_iter().collect(),
        }
    }
}

/// One batch request. `items` never exceeds the batcher's maximum size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionRequest {
    /// Service the items are requested on.
    pub service_name: String,
    /// Instrument identifiers in this batch.
    pub items: Vec<String>,
    /// Field subset, if views are enabled.
    pub view: Option<FieldView>,
}

impl SubscriptionRequest {
    /// Payload element attached to the request.
    ///
    /// `:ViewType` and `:ViewData` are only present when a view is set.
    pub fn payload(&self) -> Value {
        let mut payload = json!({ ":ItemList": self.items });
        if let (Some(view), Some(map)) = (&self.view, payload.as_object_mut()) {
            map.insert(":ViewType".to_string(), json!(view.view_type));
            map.insert(":ViewData".to_string(), json!(view.field_ids));
        }
        payload
    }
}

/// Turns an instrument list into [`SubscriptionRequest`]s of bounded size.
#[derive(Debug, Clone)]
pub struct SubscriptionBatcher {
    service_name: String,
    max_batch_size: NonZeroUsize,
    view: Option<FieldView>,
}

impl SubscriptionBatcher {
    /// Batcher for `service_name` with at most `max_batch_size` items per request.
    pub fn new(service_name: impl Into<String>, max_batch_size: NonZeroUsize) -> Self {
        Self {
            service_name: service_name.into(),
            max_batch_size,
            view: None,
        }
    }

    /// Attaches `view` to every request, or none when `None`.
    pub fn with_view(mut self, view: Option<FieldView>) -> Self {
        self.view = view;
        self
    }

    /// Largest number of items in one request.
    pub fn max_batch_size(&self) -> NonZeroUsize {
        self.max_batch_size
    }

    /// `ceil(len / max_batch_size)`.
    pub fn expected_batches(&self, len: usize) -> usize {
        len.div_ceil(self.max_batch_size.get())
    }

    /// Lazily yields contiguous batches in input order.
    pub fn batches<'a>(
        &'a self,
        identifiers: &'a [String],
    ) -> impl Iterator<Item = SubscriptionRequest> + 'a {
        identifiers
            .chunks(self.max_batch_size.get())
            .map(move |chunk| SubscriptionRequest {
                service_name: self.service_name.clone(),
                items: chunk.to_vec(),
                view: self.view.clone(),
            })
    }
}
