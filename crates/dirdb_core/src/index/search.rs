//! Indexed search: candidate resolution, re-match, and dispatch.

use crate::database::Database;
use crate::dn::Dn;
use crate::error::{CoreError, CoreResult};
use crate::filter::{matches_record, matches_scope, Filter, Scope};
use crate::index::{DnList, PlanOutcome, Truncation};
use dirdb_codec::Record;

/// Whether the callback wants more results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Keep delivering matches.
    Continue,
    /// Stop the scan after this entry.
    Stop,
}

/// The outcome of an indexed search attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchDisposition {
    /// The index answered; this many entries were delivered.
    Indexed(u32),
    /// The index cannot answer this search; run a full scan instead.
    Unindexed,
}

/// One search: base, scope, filter tree, and attribute projection.
#[derive(Debug)]
pub struct SearchRequest<'a> {
    /// Base DN of the search.
    pub base: &'a Dn,
    /// Scope relative to the base.
    pub scope: Scope,
    /// The filter tree to satisfy.
    pub tree: &'a Filter,
    /// Attributes to project into delivered entries; `None` or a `"*"`
    /// entry means all.
    pub attrs: Option<&'a [&'a str]>,
}

impl Database {
    /// Runs a search through the indices, streaming matching projected
    /// records to `on_match`.
    ///
    /// Candidate lists may over-approximate, so every candidate is
    /// re-matched against the full filter (and scope) before dispatch.
    /// Returns [`SearchDisposition::Unindexed`] when the index cannot
    /// answer and the caller must fall back to a full scan.
    ///
    /// # Errors
    ///
    /// Base-scope searches are resolved directly via
    /// [`Database::key_dn_from_idx`] by the caller and are an error
    /// here. Storage and corruption errors propagate.
    pub fn search_indexed(
        &mut self,
        request: &SearchRequest<'_>,
        on_match: &mut dyn FnMut(Record) -> CoreResult<Flow>,
    ) -> CoreResult<SearchDisposition> {
        if !self.catalog.has_attribute_indexes()
            && !self.catalog.one_level_indexes()
            && request.scope != Scope::Base
        {
            return Ok(SearchDisposition::Unindexed);
        }

        // Without a one-level index, a one-level search plans like a
        // subtree search (the re-match still enforces the scope).
        let index_scope = if request.scope == Scope::OneLevel && !self.catalog.one_level_indexes()
        {
            Scope::Subtree
        } else {
            request.scope
        };

        let mut scope_one_truncation = Truncation::NotTruncated;
        let dn_list = match index_scope {
            Scope::Base => {
                return Err(CoreError::operations(
                    "base scope searches resolve directly, not through the index",
                ));
            }

            Scope::OneLevel => {
                // Load all one-level children of the base, matching or
                // not; the one-level index makes this cheap.
                let (mut list, truncation) = match self.index_dn_one(request.base) {
                    Ok(loaded) => loaded,
                    Err(CoreError::NoSuchObject) => return Ok(SearchDisposition::Indexed(0)),
                    Err(e) => return Err(e),
                };
                scope_one_truncation = truncation;

                if self.catalog.guid_mode() {
                    // With many children, filtering them all is slow.
                    // Run the filter through the planner too and
                    // intersect; in GUID mode the intersection is
                    // O(n log m), cheap enough to do unconditionally.
                    if !self.catalog.has_attribute_indexes() {
                        return Ok(SearchDisposition::Unindexed);
                    }
                    match self.plan_filter(request.tree)? {
                        PlanOutcome::NoMatches => {
                            return Ok(SearchDisposition::Indexed(0));
                        }
                        PlanOutcome::Matches(planned) => {
                            list.intersect_with(&planned, true);
                        }
                        // The planner cannot answer this filter shape;
                        // filtering all the children is still far
                        // better than a full scan.
                        PlanOutcome::Unindexed => {}
                    }
                }
                list
            }

            Scope::Subtree => {
                if !self.catalog.has_attribute_indexes() {
                    return Ok(SearchDisposition::Unindexed);
                }
                match self.plan_filter(request.tree)? {
                    PlanOutcome::Matches(list) => list,
                    PlanOutcome::NoMatches => return Ok(SearchDisposition::Indexed(0)),
                    PlanOutcome::Unindexed => return Ok(SearchDisposition::Unindexed),
                }
            }
        };

        let count = self.index_filter(&dn_list, request, scope_one_truncation, on_match)?;
        Ok(SearchDisposition::Indexed(count))
    }

    /// Fetches, re-matches, projects, and dispatches each candidate.
    fn index_filter(
        &mut self,
        dn_list: &DnList,
        request: &SearchRequest<'_>,
        scope_one_truncation: Truncation,
        on_match: &mut dyn FnMut(Record) -> CoreResult<Flow>,
    ) -> CoreResult<u32> {
        // Materialize the backing keys up front: a callback may mutate
        // the in-memory index state that dn_list points into.
        let guid_mode = self.catalog.guid_mode();
        let mut keys: Vec<Vec<u8>> = Vec::with_capacity(dn_list.len());
        for value in dn_list.values() {
            let key = self.idx_to_key(value)?;
            if guid_mode {
                // The list is sorted, so duplicates (from truncation or
                // forced duplicate values) sit next to each other.
                if keys.last().map(Vec::as_slice) == Some(key.as_slice()) {
                    continue;
                }
            }
            keys.push(key);
        }

        let mut count = 0u32;
        for key in &keys {
            let Some(record) = self.fetch_record_by_key(key)? else {
                // Deleted inside this transaction by something running
                // in a callback; skip it.
                continue;
            };

            // The one-level index is trusted for scope: a strict,
            // non-truncated list has already proven parentage.
            let matched = if request.scope == Scope::OneLevel
                && self.catalog.one_level_indexes()
                && scope_one_truncation == Truncation::NotTruncated
            {
                matches_record(self.schema(), &record, request.tree)?
            } else {
                let record_dn = Dn::parse(&record.dn)?;
                matches_scope(&record_dn, request.base, request.scope)
                    && matches_record(self.schema(), &record, request.tree)?
            };
            if !matched {
                continue;
            }

            count += 1;
            match on_match(project(record, request.attrs))? {
                Flow::Continue => {}
                Flow::Stop => break,
            }
        }
        Ok(count)
    }
}

/// Keeps only the requested attributes of a record.
fn project(record: Record, attrs: Option<&[&str]>) -> Record {
    let Some(attrs) = attrs else {
        return record;
    };
    if attrs.iter().any(|a| *a == "*") {
        return record;
    }
    Record {
        dn: record.dn,
        elements: record
            .elements
            .into_iter()
            .filter(|el| attrs.iter().any(|a| el.name.eq_ignore_ascii_case(a)))
            .collect(),
    }
}
