//! Translation of select queries into parameterised PostGIS SQL.

use crate::error::EngineResult;
use crate::geometry::{SpatialPredicate, DEFAULT_SRID};
use crate::model::{quote_ident, FieldValue, TableName};
use crate::predicate::Predicate;

/// A projected column.
#[derive(Debug, Clone, PartialEq)]
pub enum SelectColumn {
    /// Plain column, returned as stored.
    Column(String),
    /// Geometry column, returned as well-known binary under the same name.
    GeometryWkb(String),
}

impl SelectColumn {
    pub fn name(&self) -> &str {
        match self {
            SelectColumn::Column(name) | SelectColumn::GeometryWkb(name) => name,
        }
    }
}

/// A projection plus filter over one table.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectQuery {
    pub table: TableName,
    pub columns: Vec<SelectColumn>,
    pub filter: Option<Predicate>,
}

/// SQL text with positional parameters (`$1`, `$2`, ...).
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub sql: String,
    pub params: Vec<FieldValue>,
}

impl SelectQuery {
    pub fn new(table: TableName, columns: Vec<SelectColumn>) -> Self {
        Self {
            table,
            columns,
            filter: None,
        }
    }

    pub fn with_filter(mut self, filter: Option<Predicate>) -> Self {
        self.filter = filter;
        self
    }

    /// Render as a PostGIS `SELECT`.
    pub fn compile(&self) -> EngineResult<CompiledQuery> {
        let mut binder = Binder::default();

        let columns = if self.columns.is_empty() {
            "*".to_string()
        } else {
            self.columns
                .iter()
                .map(|column| match column {
                    SelectColumn::Column(name) => quote_ident(name),
                    SelectColumn::GeometryWkb(name) => {
                        format!("ST_AsBinary({col}) AS {col}", col = quote_ident(name))
                    }
                })
                .collect::<Vec<_>>()
                .join(", ")
        };

        let mut sql = format!("SELECT {} FROM {}", columns, self.table.quoted());
        if let Some(filter) = &self.filter {
            sql.push_str(" WHERE ");
            sql.push_str(&predicate_sql(filter, &mut binder)?);
        }

        Ok(CompiledQuery {
            sql,
            params: binder.params,
        })
    }
}

#[derive(Default)]
struct Binder {
    params: Vec<FieldValue>,
}

impl Binder {
    fn bind(&mut self, value: FieldValue) -> String {
        self.params.push(value);
        format!("${}", self.params.len())
    }
}

fn predicate_sql(predicate: &Predicate, binder: &mut Binder) -> EngineResult<String> {
    Ok(match predicate {
        Predicate::Spatial { column, predicate } => spatial_sql(column, predicate, binder)?,
        Predicate::Compare { column, op, value } => {
            format!("{} {} {}", quote_ident(column), op.as_sql(), binder.bind(value.clone()))
        }
        Predicate::IsNull(column) => format!("{} IS NULL", quote_ident(column)),
        Predicate::In { values, .. } if values.is_empty() => "FALSE".to_string(),
        Predicate::In { column, values } => {
            let placeholders = values
                .iter()
                .map(|v| binder.bind(v.clone()))
                .collect::<Vec<_>>()
                .join(", ");
            format!("{} IN ({})", quote_ident(column), placeholders)
        }
        Predicate::And(parts) => join(parts, " AND ", "TRUE", binder)?,
        Predicate::Or(parts) => join(parts, " OR ", "FALSE", binder)?,
    })
}

fn join(parts: &[Predicate], separator: &str, empty: &str, binder: &mut Binder) -> EngineResult<String> {
    if parts.is_empty() {
        return Ok(empty.to_string());
    }
    let rendered = parts
        .iter()
        .map(|part| predicate_sql(part, binder).map(|sql| format!("({})", sql)))
        .collect::<EngineResult<Vec<_>>>()?;
    Ok(rendered.join(separator))
}

impl Predicate {
    /// Render as a standalone SQL condition with parameters from `$1`.
    pub fn to_sql(&self) -> EngineResult<CompiledQuery> {
        let mut binder = Binder::default();
        let sql = predicate_sql(self, &mut binder)?;
        Ok(CompiledQuery {
            sql,
            params: binder.params,
        })
    }
}

/// Translate a spatial predicate.
///
/// Buffered predicates go through `geography` so the distance is in meters;
/// the query geometry is transformed to lon/lat first and the buffer comes
/// back as SRID 4326.
fn spatial_sql(column: &str, predicate: &SpatialPredicate, binder: &mut Binder) -> EngineResult<String> {
    let column = quote_ident(column);
    let query_geometry = predicate.geometry();
    let wkb = binder.bind(FieldValue::Bytes(query_geometry.to_wkb()?));
    let srid = binder.bind(FieldValue::Int(query_geometry.srid as i64));
    let geometry = format!("ST_GeomFromWKB({}, {}::int4)", wkb, srid);

    Ok(match predicate {
        SpatialPredicate::Intersects { .. } => format!("ST_Intersects({}, {})", column, geometry),
        SpatialPredicate::IntersectsBuffered { distance_m, .. } => {
            let distance = binder.bind(FieldValue::Float(*distance_m));
            format!(
                "ST_Intersects({}, ST_SetSRID(ST_Buffer(ST_Transform({}, {})::geography, {}::float8)::geometry, {}))",
                column, geometry, DEFAULT_SRID, distance, DEFAULT_SRID
            )
        }
    })
}
