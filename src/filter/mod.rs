//! Object filters for label masks.

pub mod lookup;
pub mod matching;
pub mod size;

pub use lookup::{
    build_lookup, cleanup_lookup, collect_footprints, count_cytosol_occurrences,
    find_multinucleated, find_orphan_cytosols, match_footprint, match_nuclei, rewrite_cytosol,
    Footprint, InitialMatch, LookupOutcome, LookupTable, MatchOutcome, MatchStats,
};
pub use matching::{match_ids, MatchConfig, MatchResult, NucleusCytosolMatcher};
pub use size::{filter_size, SizeFilter, SizeFilterConfig, SizeFilterResult};
