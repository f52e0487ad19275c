//! Streaming GeoJSON FeatureCollection output.
//!
//! Features are written and flushed one at a time so the client starts
//! receiving data before the query finishes. The document is only closed
//! (footer with counts) when the row stream is exhausted; an error or a
//! cancellation leaves it truncated.

use futures::StreamExt;
use geo::BoundingRect;
use metrics::counter;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use edr_protocol::geojson::{feature_collection_footer, FEATURE_COLLECTION_HEADER};
use edr_protocol::{Feature, Geometry};

use crate::error::{EngineError, EngineResult};
use crate::geometry::decode_wkb;
use crate::model::Row;
use crate::provider::{cancellable, RowStream};

/// Writes rows to `sink` as a GeoJSON FeatureCollection.
pub struct GeoJsonStreamWriter<W> {
    sink: W,
    count: usize,
}

impl<W> GeoJsonStreamWriter<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(sink: W) -> Self {
        Self { sink, count: 0 }
    }

    /// Features written so far.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Consume `rows` and write the whole document.
    ///
    /// Rows are pulled one at a time; once `cancel` fires no further row is
    /// requested and nothing more is written. Returns the feature count.
    pub async fn write_all(
        mut self,
        mut rows: RowStream<'_>,
        cancel: &CancellationToken,
    ) -> EngineResult<usize> {
        self.write_chunk(FEATURE_COLLECTION_HEADER.as_bytes(), cancel)
            .await?;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(EngineError::Cancelled),
                next = rows.next() => next,
            };
            let Some(row) = next else { break };

            let feature = row_to_feature(&row?)?;

            let mut buf = Vec::with_capacity(256);
            if self.count > 0 {
                buf.push(b',');
            }
            serde_json::to_writer(&mut buf, &feature)
                .map_err(|e| EngineError::CorruptRow(e.to_string()))?;

            self.write_chunk(&buf, cancel).await?;
            self.count += 1;
            counter!("edr_features_streamed_total").increment(1);
        }

        let footer = feature_collection_footer(self.count);
        self.write_chunk(footer.as_bytes(), cancel).await?;

        debug!(features = self.count, "Finished feature collection");
        Ok(self.count)
    }

    async fn write_chunk(&mut self, bytes: &[u8], cancel: &CancellationToken) -> EngineResult<()> {
        let sink = &mut self.sink;
        cancellable(cancel, async move {
            sink.write_all(bytes).await?;
            sink.flush().await?;
            Ok::<(), EngineError>(())
        })
        .await
    }
}

/// Convert a storage row into a feature.
///
/// The geometry is decoded from the geometry column's WKB and the bbox set
/// to its envelope. Every non-reserved, non-null column becomes a property;
/// non-finite numbers are dropped.
pub fn row_to_feature(row: &Row) -> EngineResult<Feature> {
    let wkb = row.geometry_wkb().ok_or_else(|| {
        EngineError::CorruptRow(format!("row {} has no geometry", describe(row)))
    })?;
    let geometry = decode_wkb(wkb).map_err(|e| {
        EngineError::CorruptRow(format!("row {} has undecodable geometry: {}", describe(row), e))
    })?;

    let mut feature = Feature::new(Geometry::from(&geometry));
    if let Some(rect) = geometry.bounding_rect() {
        feature = feature.with_bbox([rect.min().x, rect.min().y, rect.max().x, rect.max().y]);
    }

    for (name, value) in row.attributes() {
        if let Some(json) = value.to_json() {
            feature.properties.insert(name.to_string(), json);
        }
    }

    Ok(feature)
}

fn describe(row: &Row) -> String {
    row.id()
        .map(|id| id.to_string())
        .unwrap_or_else(|| "<unknown>".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{QueryGeometry, DEFAULT_SRID};
    use crate::model::{FieldValue, GEOMETRY_COLUMN, ID_COLUMN};
    use serde_json::Value;

    fn wkb(wkt: &str) -> Vec<u8> {
        QueryGeometry::parse(wkt, DEFAULT_SRID).unwrap().to_wkb().unwrap()
    }

    #[test]
    fn test_feature_from_row() {
        let row = Row::new()
            .with(ID_COLUMN, 1i64)
            .with(GEOMETRY_COLUMN, wkb("LINESTRING(0 1, 2 3)"))
            .with("name", "Exe")
            .with("level", 1.5)
            .with("gauge", FieldValue::Null)
            .with("DeletedVersion", FieldValue::Null);

        let feature = row_to_feature(&row).unwrap();
        assert_eq!(feature.bbox, Some([0.0, 1.0, 2.0, 3.0]));
        assert_eq!(
            feature.geometry,
            Geometry::LineString {
                coordinates: vec![[0.0, 1.0], [2.0, 3.0]]
            }
        );
        assert_eq!(feature.properties.len(), 2);
        assert_eq!(feature.properties["name"], Value::from("Exe"));
        assert!(!feature.properties.contains_key(ID_COLUMN));
    }

    #[test]
    fn test_point_bbox_is_degenerate() {
        let row = Row::new().with(GEOMETRY_COLUMN, wkb("POINT(-3.5 50.7)"));
        let feature = row_to_feature(&row).unwrap();
        assert_eq!(feature.bbox, Some([-3.5, 50.7, -3.5, 50.7]));
    }

    #[test]
    fn test_missing_geometry_is_corrupt() {
        let row = Row::new().with(ID_COLUMN, 9i64);
        match row_to_feature(&row) {
            Err(EngineError::CorruptRow(msg)) => assert!(msg.contains('9')),
            other => panic!("expected CorruptRow, got {:?}", other),
        }

        let row = Row::new().with(GEOMETRY_COLUMN, vec![0xffu8; 3]);
        assert!(matches!(row_to_feature(&row), Err(EngineError::CorruptRow(_))));
    }
}
