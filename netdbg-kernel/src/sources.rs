//! Source index backing line-breakpoint resolution.
//!
//! Maps source-path keys to the method ranges each loaded module
//! contributes, stored in nesting order so a (file, line) query resolves
//! the narrowest enclosing method first and widens only when the inner
//! method yields no usable sequence point. A line outside every range
//! yields no sites, leaving the breakpoint unverified until a later
//! module load covers it.

use netdbg_core::types::{IlOffset, MethodToken, ModuleAddress};
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::trace;

/// Line/column extent of one method inside one source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodRange {
    /// Method token within the contributing module.
    pub token: MethodToken,
    /// First source line of the method.
    pub start_line: u32,
    /// Last source line of the method.
    pub end_line: u32,
    /// Column of the first line.
    pub start_column: u32,
    /// Column of the last line.
    pub end_column: u32,
    /// True for instance and static constructors. A field-initializer
    /// line shows up in every constructor's range.
    pub is_ctor: bool,
}

impl MethodRange {
    /// True when `self` lies inside `other` (inclusive bounds, column
    /// aware).
    #[must_use]
    pub fn nested_into(&self, other: &MethodRange) -> bool {
        (self.start_line > other.start_line
            || (self.start_line == other.start_line && self.start_column >= other.start_column))
            && (self.end_line < other.end_line
                || (self.end_line == other.end_line && self.end_column <= other.end_column))
    }

    /// True when `line` lies within the range.
    #[must_use]
    pub fn contains_line(&self, line: u32) -> bool {
        self.start_line <= line && line <= self.end_line
    }
}

/// A sequence point the symbol reader snapped a request to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnappedPoint {
    /// IL offset of the snapped statement.
    pub il_offset: IlOffset,
    /// First line of the snapped statement.
    pub start_line: u32,
    /// Last line of the snapped statement.
    pub end_line: u32,
}

/// One resolved breakpoint site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedSite {
    /// Contributing module.
    pub module: ModuleAddress,
    /// Method owning the site.
    pub method: MethodToken,
    /// IL offset of the site.
    pub il_offset: IlOffset,
    /// First line of the resolved statement.
    pub start_line: u32,
    /// Last line of the resolved statement.
    pub end_line: u32,
}

/// Method ranges one module contributes to one file, grouped into
/// nesting levels: level 0 holds outermost methods, deeper levels hold
/// methods nested (by line extent) into the level above.
#[derive(Debug)]
struct FileModuleData {
    module: ModuleAddress,
    levels: Vec<Vec<MethodRange>>,
}

#[derive(Default)]
struct SourceIndexInner {
    files: HashMap<String, Vec<FileModuleData>>,
}

/// The source index. Keys follow the host filesystem convention: on
/// case-insensitive hosts paths are upper-cased before indexing and
/// lookup.
#[derive(Default)]
pub struct SourceIndex {
    inner: Mutex<SourceIndexInner>,
}

/// Normalize a path into an index key.
#[must_use]
pub fn path_key(path: &str) -> String {
    if cfg!(windows) {
        path.to_uppercase()
    } else {
        path.to_string()
    }
}

/// Group ranges into nesting levels. The depth of a range is the
/// number of distinct ranges strictly enclosing it; each level is
/// ordered by (end line, end column).
fn build_levels(ranges: Vec<MethodRange>) -> Vec<Vec<MethodRange>> {
    let mut depths = vec![0usize; ranges.len()];
    for (i, range) in ranges.iter().enumerate() {
        depths[i] = ranges
            .iter()
            .enumerate()
            .filter(|(j, other)| i != *j && range.nested_into(other) && !other.nested_into(range))
            .count();
    }

    let max_depth = depths.iter().copied().max().unwrap_or(0);
    let mut levels = vec![Vec::new(); max_depth + 1];
    for (range, depth) in ranges.into_iter().zip(depths) {
        levels[depth].push(range);
    }
    for level in &mut levels {
        level.sort_by_key(|r| (r.end_line, r.end_column));
    }
    levels
}

impl SourceIndex {
    /// Create an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the method ranges `module` contributes to `file`.
    pub fn add_module_file(&self, module: ModuleAddress, file: &str, ranges: Vec<MethodRange>) {
        if ranges.is_empty() {
            return;
        }
        let key = path_key(file);
        trace!(%module, file = %key, ranges = ranges.len(), "indexing source file");
        let mut inner = self.inner.lock();
        let per_file = inner.files.entry(key).or_default();
        per_file.push(FileModuleData {
            module,
            levels: build_levels(ranges),
        });
    }

    /// Drop everything a module contributed.
    pub fn remove_module(&self, module: ModuleAddress) {
        let mut inner = self.inner.lock();
        for per_file in inner.files.values_mut() {
            per_file.retain(|data| data.module != module);
        }
        inner.files.retain(|_, per_file| !per_file.is_empty());
    }

    /// Drop the whole index.
    pub fn clear(&self) {
        self.inner.lock().files.clear();
    }

    /// All indexed keys matching a requested path: the exact key, or
    /// keys ending in a path-separator-aligned suffix of it (so a bare
    /// file name finds every directory it lives in).
    fn matching_keys(inner: &SourceIndexInner, requested: &str) -> Vec<String> {
        if inner.files.contains_key(requested) {
            return vec![requested.to_string()];
        }
        inner
            .files
            .keys()
            .filter(|key| {
                key.ends_with(requested)
                    && key[..key.len() - requested.len()]
                        .chars()
                        .next_back()
                        .is_some_and(|c| c == '/' || c == '\\')
            })
            .cloned()
            .collect()
    }

    /// Resolve `(file, line)` to breakpoint sites. `module_filter`
    /// restricts the walk to one module (used when re-resolving against
    /// a newly loaded module). `snap` asks the owning module's symbol
    /// reader for the nearest user-code sequence point at or after the
    /// line inside the given method; returning `None` widens the search
    /// to the next enclosing method.
    pub fn resolve<F>(
        &self,
        file: &str,
        module_filter: Option<ModuleAddress>,
        line: u32,
        mut snap: F,
    ) -> Vec<ResolvedSite>
    where
        F: FnMut(ModuleAddress, MethodToken, u32) -> Option<SnappedPoint>,
    {
        let requested = path_key(file);
        let inner = self.inner.lock();
        let mut sites = Vec::new();

        for key in Self::matching_keys(&inner, &requested) {
            let Some(per_file) = inner.files.get(&key) else {
                continue;
            };
            for data in per_file {
                if module_filter.is_some_and(|m| m != data.module) {
                    continue;
                }
                // Innermost level first; widen only while nothing
                // snapped.
                for level in data.levels.iter().rev() {
                    let mut resolved_any = false;
                    for range in level.iter().filter(|r| r.contains_line(line)) {
                        if let Some(point) = snap(data.module, range.token, line) {
                            resolved_any = true;
                            sites.push(ResolvedSite {
                                module: data.module,
                                method: range.token,
                                il_offset: point.il_offset,
                                start_line: point.start_line,
                                end_line: point.end_line,
                            });
                        }
                    }
                    if resolved_any {
                        break;
                    }
                }
            }
        }

        sites
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn range(token: u32, lines: (u32, u32)) -> MethodRange {
        MethodRange {
            token: MethodToken(token),
            start_line: lines.0,
            end_line: lines.1,
            start_column: 1,
            end_column: 80,
            is_ctor: false,
        }
    }

    fn snap_to_start(
        _module: ModuleAddress,
        token: MethodToken,
        line: u32,
    ) -> Option<SnappedPoint> {
        // Pretend every method has a sequence point on every line.
        let _ = token;
        Some(SnappedPoint {
            il_offset: IlOffset(line),
            start_line: line,
            end_line: line,
        })
    }

    #[test]
    fn innermost_method_wins() {
        let index = SourceIndex::new();
        // Outer method lines 1..=40, a lambda nested at 10..=20.
        index.add_module_file(
            ModuleAddress(1),
            "Program.cs",
            vec![range(1, (1, 40)), range(2, (10, 20))],
        );

        let sites = index.resolve("Program.cs", None, 15, snap_to_start);
        assert_eq!(sites.len(), 1);
        assert_eq!(sites[0].method, MethodToken(2));

        let sites = index.resolve("Program.cs", None, 30, snap_to_start);
        assert_eq!(sites.len(), 1);
        assert_eq!(sites[0].method, MethodToken(1));
    }

    #[test]
    fn field_initializer_resolves_in_every_ctor() {
        let index = SourceIndex::new();
        // Two constructors, both covering the field-initializer line 5.
        let mut ctor_a = range(10, (5, 12));
        ctor_a.is_ctor = true;
        let mut ctor_b = range(11, (5, 18));
        ctor_b.is_ctor = true;
        index.add_module_file(ModuleAddress(1), "Widget.cs", vec![ctor_a, ctor_b]);

        let mut sites = index.resolve("Widget.cs", None, 5, snap_to_start);
        sites.sort_by_key(|s| s.method.0);
        assert_eq!(sites.len(), 2);
        assert_eq!(sites[0].method, MethodToken(10));
        assert_eq!(sites[1].method, MethodToken(11));
    }

    #[test]
    fn line_outside_any_method_yields_nothing() {
        let index = SourceIndex::new();
        index.add_module_file(ModuleAddress(1), "Program.cs", vec![range(1, (10, 20))]);
        assert!(index.resolve("Program.cs", None, 5, snap_to_start).is_empty());
        assert!(index.resolve("Program.cs", None, 99, snap_to_start).is_empty());
    }

    #[test]
    fn failed_snap_widens_to_enclosing_method() {
        let index = SourceIndex::new();
        index.add_module_file(
            ModuleAddress(1),
            "Program.cs",
            vec![range(1, (1, 40)), range(2, (10, 20))],
        );

        // The inner method has no sequence points; the outer one snaps.
        let sites = index.resolve("Program.cs", None, 15, |_, token, line| {
            if token == MethodToken(2) {
                None
            } else {
                Some(SnappedPoint {
                    il_offset: IlOffset(7),
                    start_line: line + 1,
                    end_line: line + 1,
                })
            }
        });
        assert_eq!(sites.len(), 1);
        assert_eq!(sites[0].method, MethodToken(1));
        assert_eq!(sites[0].start_line, 16);
    }

    #[test]
    fn module_filter_restricts_resolution() {
        let index = SourceIndex::new();
        index.add_module_file(ModuleAddress(1), "Shared.cs", vec![range(1, (1, 30))]);
        index.add_module_file(ModuleAddress(2), "Shared.cs", vec![range(7, (1, 30))]);

        let all = index.resolve("Shared.cs", None, 10, snap_to_start);
        assert_eq!(all.len(), 2);

        let only_two = index.resolve("Shared.cs", Some(ModuleAddress(2)), 10, snap_to_start);
        assert_eq!(only_two.len(), 1);
        assert_eq!(only_two[0].method, MethodToken(7));
    }

    #[test]
    fn file_name_suffix_lookup() {
        let index = SourceIndex::new();
        index.add_module_file(
            ModuleAddress(1),
            "/work/app/Program.cs",
            vec![range(1, (1, 30))],
        );

        assert_eq!(index.resolve("Program.cs", None, 5, snap_to_start).len(), 1);
        // Not separator aligned: must not match.
        assert!(index.resolve("gram.cs", None, 5, snap_to_start).is_empty());
    }

    #[test]
    fn removed_module_stops_resolving() {
        let index = SourceIndex::new();
        index.add_module_file(ModuleAddress(1), "Program.cs", vec![range(1, (1, 30))]);
        index.remove_module(ModuleAddress(1));
        assert!(index.resolve("Program.cs", None, 5, snap_to_start).is_empty());
    }

    proptest! {
        /// Resolution never reports two sites where one method strictly
        /// encloses the other: the inner one must have shadowed it.
        #[test]
        fn no_enclosing_pairs_in_result(
            spans in proptest::collection::vec((1u32..50, 1u32..50), 1..8),
            line in 1u32..60,
        ) {
            let ranges: Vec<MethodRange> = spans
                .iter()
                .enumerate()
                .map(|(i, (a, b))| {
                    let (start, end) = if a <= b { (*a, *b) } else { (*b, *a) };
                    range(u32::try_from(i).unwrap() + 1, (start, end))
                })
                .collect();
            let by_token: std::collections::HashMap<u32, MethodRange> =
                ranges.iter().map(|r| (r.token.0, *r)).collect();

            let index = SourceIndex::new();
            index.add_module_file(ModuleAddress(1), "P.cs", ranges);
            let sites = index.resolve("P.cs", None, line, snap_to_start);

            for a in &sites {
                let ra = by_token[&a.method.0];
                prop_assert!(ra.contains_line(line));
                for b in &sites {
                    if a.method == b.method {
                        continue;
                    }
                    let rb = by_token[&b.method.0];
                    prop_assert!(
                        !(ra.nested_into(&rb) && !rb.nested_into(&ra)),
                        "site {:?} strictly encloses reported site {:?}",
                        rb,
                        ra
                    );
                }
            }
        }
    }
}
