//! Stale Finder: per-(model, CRM) SQL generator that emits an id-only
//! relation of records whose mirrored state has drifted (spec.md §4.6).
//!
//! Unlike the rest of the engine, this component never materializes a
//! record — it only ever asks SQLite for a list of ids, which is why it
//! is specified entirely in terms of table/column metadata rather than
//! the [`crate::binding::Record`] trait. The "reflection-driven SQL
//! generation" re-architecture note in spec.md §9 leans on the store's
//! own query builder where one exists; since this workspace's store is a
//! raw `rusqlite::Connection` rather than an ORM, every association kind
//! is expressed here as hand-authored, explicitly aliased SQL.

use etlify_interrupt_support::Interruptee;
use etlify_sql_support::ConnExt;
use rusqlite::Connection;

use crate::binding::ModelBinding;
use crate::error::Result;

/// Which SQL dialect's idioms to emit (spec.md §4.6 portability rules).
/// The workspace ships a SQLite store, but the generator is written
/// dialect-aware so a host backed by Postgres can reuse it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Postgres,
    Sqlite,
}

impl Dialect {
    fn epoch_literal(self) -> &'static str {
        match self {
            Dialect::Postgres => "TIMESTAMP '1970-01-01 00:00:00'",
            // Timestamp columns in this workspace's schema (schema.rs) are
            // INTEGER epoch-millis, not SQLite TEXT datetimes. SQLite's
            // storage-class ordering (NULL < INTEGER/REAL < TEXT < BLOB)
            // means a TEXT epoch marker folded through MAX()/`<` alongside
            // those INTEGER columns always sorts greater than any real
            // timestamp, so it must stay an INTEGER literal.
            Dialect::Sqlite => "0",
        }
    }

    /// `GREATEST(...)` on Postgres-family stores; `MAX(...)` as a scalar
    /// (not aggregate) function elsewhere — SQLite's `max()` takes this
    /// shape when called with more than one argument.
    fn greatest(self, exprs: &[String]) -> String {
        let fname = match self {
            Dialect::Postgres => "GREATEST",
            Dialect::Sqlite => "MAX",
        };
        format!("{fname}({})", exprs.join(", "))
    }
}

/// One hop of a multi-table join chain, used to express nested
/// `has_many through: through` associations (spec.md §4.6's "delegate to
/// the store's own join builder; alias the owner table... to avoid
/// duplicate-name collisions on self-joins").
#[derive(Clone, Debug)]
pub struct JoinHop {
    pub table: String,
    pub alias: String,
    /// Column on the *previous* hop (or the owner row for the first hop).
    pub prev_column: String,
    /// Column on *this* hop that joins back to `prev_column`.
    pub this_column: String,
    /// `(type_column, literal)` predicate when this hop's join table
    /// stores a polymorphic type discriminator.
    pub type_predicate: Option<(String, String)>,
}

/// One declared association contributing to a record's staleness
/// threshold (spec.md §4.6's association-kind table).
#[derive(Clone, Debug)]
pub enum StaleAssociation {
    /// `belongs_to` (non-polymorphic): scalar lookup on the target's
    /// primary key.
    BelongsTo {
        table: String,
        /// Column on the *owner* table holding the foreign key.
        owner_fk_column: String,
        target_pk: String,
    },
    /// `has_one` / `has_many`: `MAX(updated_at)` filtered by
    /// `fk = owner_pk`; both kinds reduce to the same aggregate shape.
    HasMany {
        table: String,
        fk_column: String,
        /// `(type_column, literal)` when the inverse side is polymorphic.
        polymorphic_type: Option<(String, String)>,
    },
    /// `has_many :through` (one hop): join the through-table to the
    /// source table.
    HasManyThrough {
        through_table: String,
        through_owner_fk: String,
        through_source_fk: String,
        source_table: String,
        source_pk: String,
        through_polymorphic_type: Option<(String, String)>,
    },
    /// `has_many :through` of `:through` (nested, arbitrary depth):
    /// explicit join-hop chain, each hop aliased to avoid self-join
    /// column collisions.
    HasManyNestedThrough { hops: Vec<JoinHop>, final_updated_at_table_alias: String },
    /// `has_and_belongs_to_many`: join via a join table.
    HasAndBelongsToMany {
        join_table: String,
        owner_fk: String,
        target_fk: String,
        target_table: String,
        target_pk: String,
    },
    /// Polymorphic `belongs_to` on the owner side: conservative epoch,
    /// avoids a per-type table scan (spec.md §4.6).
    PolymorphicOwner,
    /// Unknown / non-constantizable target: safe no-op, treated as epoch.
    Unknown,
}

impl StaleAssociation {
    /// Renders this association as a `COALESCE(<subquery>, <epoch>)`
    /// scalar expression, correlated against `owner_pk_expr` (e.g.
    /// `"r"."id"`). `idx` disambiguates aliases across associations on
    /// the same binding.
    fn expr(&self, dialect: Dialect, owner_pk_expr: &str, idx: usize) -> String {
        let epoch = dialect.epoch_literal();
        match self {
            StaleAssociation::BelongsTo {
                table,
                owner_fk_column,
                target_pk,
            } => {
                let alias = format!("bt{idx}");
                format!(
                    "COALESCE((SELECT {alias}.updated_at FROM {table} {alias} WHERE {alias}.{target_pk} = {owner_pk_expr_col}), {epoch})",
                    owner_pk_expr_col = owner_fk_col_ref(owner_pk_expr, owner_fk_column),
                )
            }
            StaleAssociation::HasMany {
                table,
                fk_column,
                polymorphic_type,
            } => {
                let alias = format!("hm{idx}");
                let mut predicate = format!("{alias}.{fk_column} = {owner_pk_expr}");
                if let Some((type_column, literal)) = polymorphic_type {
                    predicate.push_str(&format!(" AND {alias}.{type_column} = '{literal}'"));
                }
                format!(
                    "COALESCE((SELECT MAX({alias}.updated_at) FROM {table} {alias} WHERE {predicate}), {epoch})"
                )
            }
            StaleAssociation::HasManyThrough {
                through_table,
                through_owner_fk,
                through_source_fk,
                source_table,
                source_pk,
                through_polymorphic_type,
            } => {
                let through_alias = format!("th{idx}");
                let source_alias = format!("src{idx}");
                let mut predicate = format!("{through_alias}.{through_owner_fk} = {owner_pk_expr}");
                if let Some((type_column, literal)) = through_polymorphic_type {
                    predicate.push_str(&format!(" AND {through_alias}.{type_column} = '{literal}'"));
                }
                format!(
                    "COALESCE((SELECT MAX({source_alias}.updated_at) FROM {through_table} {through_alias} \
                     JOIN {source_table} {source_alias} ON {source_alias}.{source_pk} = {through_alias}.{through_source_fk} \
                     WHERE {predicate}), {epoch})"
                )
            }
            StaleAssociation::HasManyNestedThrough {
                hops,
                final_updated_at_table_alias,
            } => {
                let first = &hops[0];
                let mut where_pred = format!("{}.{} = {}", first.alias, first.this_column, owner_pk_expr);
                if let Some((type_column, literal)) = &first.type_predicate {
                    where_pred.push_str(&format!(" AND {}.{} = '{}'", first.alias, type_column, literal));
                }
                let mut joins = Vec::new();
                let mut prev_alias = first.alias.clone();
                for hop in &hops[1..] {
                    let mut on = format!(
                        "{alias}.{this_col} = {prev_alias}.{prev_col}",
                        alias = hop.alias,
                        this_col = hop.this_column,
                        prev_col = hop.prev_column,
                    );
                    if let Some((type_column, literal)) = &hop.type_predicate {
                        on.push_str(&format!(" AND {}.{} = '{}'", hop.alias, type_column, literal));
                    }
                    joins.push(format!("JOIN {table} {alias} ON {on}", table = hop.table, alias = hop.alias));
                    prev_alias = hop.alias.clone();
                }
                format!(
                    "COALESCE((SELECT MAX({alias}.updated_at) FROM {first_table} {first_alias} {joins} WHERE {where_pred}), {epoch})",
                    alias = final_updated_at_table_alias,
                    first_table = first.table,
                    first_alias = first.alias,
                    joins = joins.join(" "),
                )
            }
            StaleAssociation::HasAndBelongsToMany {
                join_table,
                owner_fk,
                target_fk,
                target_table,
                target_pk,
            } => {
                let join_alias = format!("jt{idx}");
                let target_alias = format!("tgt{idx}");
                format!(
                    "COALESCE((SELECT MAX({target_alias}.updated_at) FROM {join_table} {join_alias} \
                     JOIN {target_table} {target_alias} ON {target_alias}.{target_pk} = {join_alias}.{target_fk} \
                     WHERE {join_alias}.{owner_fk} = {owner_pk_expr}), {epoch})"
                )
            }
            StaleAssociation::PolymorphicOwner | StaleAssociation::Unknown => epoch.to_string(),
        }
    }
}

fn owner_fk_col_ref(owner_pk_expr: &str, owner_fk_column: &str) -> String {
    // owner_pk_expr is the owner's table-qualified pk, e.g. "r"."id";
    // belongs_to correlates on the owner's *own* fk column instead, so we
    // swap the column name but keep the table qualifier.
    match owner_pk_expr.rsplit_once('.') {
        Some((table, _pk)) => format!("{table}.{owner_fk_column}"),
        None => owner_fk_column.to_string(),
    }
}

/// Generates and runs the Stale Finder query for one `(model, crm)`
/// binding.
pub struct StaleFinder<'a> {
    pub conn: &'a Connection,
    pub dialect: Dialect,
}

impl<'a> StaleFinder<'a> {
    pub fn new(conn: &'a Connection, dialect: Dialect) -> Self {
        Self { conn, dialect }
    }

    /// Builds the SQL text for the relation described in spec.md §4.6.
    /// Exposed separately from [`Self::stale_ids`] so callers can embed
    /// it as a subquery (e.g. BatchSync intersecting several bindings).
    pub fn build_sql(&self, binding: &ModelBinding, max_sync_errors: u32) -> String {
        let owner_pk_expr = "r.id";
        let mut threshold_terms = vec!["r.updated_at".to_string()];
        for (idx, assoc) in binding.stale_associations.iter().enumerate() {
            threshold_terms.push(assoc.expr(self.dialect, owner_pk_expr, idx));
        }
        threshold_terms.push(self.dialect.epoch_literal().to_string());
        let threshold = self.dialect.greatest(&threshold_terms);
        let epoch = self.dialect.epoch_literal();

        let mut sql = format!(
            "SELECT r.id AS id FROM {table} r \
             LEFT JOIN crm_synchronisations ss \
               ON ss.resource_type = '{model}' AND ss.resource_id = r.id AND ss.crm_name = '{crm}' \
             WHERE (ss.id IS NULL OR COALESCE(ss.last_synced_at, {epoch}) < {threshold}) \
               AND (ss.id IS NULL OR ss.error_count < {max_sync_errors})",
            table = binding.table_name,
            model = binding.model_name,
            crm = binding.crm_name,
        );
        if let Some(scope) = &binding.stale_scope_sql {
            sql.push_str(&format!(" AND ({scope})"));
        }
        sql.push_str(" ORDER BY r.id ASC");
        sql
    }

    /// Runs the query and returns matching ids, checking `interruptee`
    /// between row fetches so a host can cancel a long scan
    /// (spec.md §5, §9).
    pub fn stale_ids(
        &self,
        binding: &ModelBinding,
        max_sync_errors: u32,
        interruptee: &dyn Interruptee,
    ) -> Result<Vec<i64>> {
        let sql = self.build_sql(binding, max_sync_errors);
        let mut stmt = self.conn.prepare_maybe_cached(&sql, false)?;
        let mut rows = stmt.query([])?;
        let mut ids = Vec::new();
        while let Some(row) = rows.next()? {
            interruptee.err_if_interrupted()?;
            ids.push(row.get::<_, i64>("id")?);
        }
        Ok(ids)
    }
}
