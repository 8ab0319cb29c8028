//! Member-by-member diffs of type layouts, recursing into base types.

use crate::Change;
use crate::check_invariant;
use crate::correspondence::VeryLikelyTheSame as _;
use crate::error::Result;
use binsize_model::TypeLayoutItem;
use binsize_model::TypeLayoutItemMember;
use binsize_model::UserDefinedType;
use std::rc::Rc;
use tracing::trace;

#[derive(Debug)]
pub struct TypeLayoutItemDiff<'a> {
    change: Change<&'a TypeLayoutItem>,
    member_diffs: Vec<TypeLayoutItemMemberDiff<'a>>,
    base_type_diffs: Vec<TypeLayoutItemDiff<'a>>,
    is_unchanged: bool,
}

#[derive(Debug)]
pub struct TypeLayoutItemMemberDiff<'a> {
    change: Change<&'a TypeLayoutItemMember>,
}

impl<'a> TypeLayoutItemDiff<'a> {
    #[must_use]
    pub fn name(&self) -> &'a str {
        &self.user_defined_type().name
    }

    /// The after type if present.
    #[must_use]
    pub fn user_defined_type(&self) -> &'a UserDefinedType {
        &self.change.latest().user_defined_type
    }

    #[must_use]
    pub fn change(&self) -> Change<&'a TypeLayoutItem> {
        self.change
    }

    #[must_use]
    pub fn instance_size_diff(&self) -> i64 {
        self.change
            .delta(|t| u64::from(t.user_defined_type.instance_size))
    }

    #[must_use]
    pub fn alignment_waste_exclusive_diff_bits(&self) -> i64 {
        self.change.delta(|t| t.alignment_waste_exclusive_bits)
    }

    #[must_use]
    pub fn alignment_waste_including_base_types_diff_bits(&self) -> i64 {
        self.change
            .delta(TypeLayoutItem::alignment_waste_including_base_types_bits)
    }

    #[must_use]
    pub fn used_for_vfptrs_exclusive_diff(&self) -> i64 {
        self.change
            .delta(|t| u64::from(t.used_for_vfptrs_exclusive))
    }

    #[must_use]
    pub fn used_for_vfptrs_including_base_types_diff(&self) -> i64 {
        self.change
            .delta(TypeLayoutItem::used_for_vfptrs_including_base_types)
    }

    /// True only if both sides exist, every member found an equally sized partner and every base
    /// type is unchanged too.
    #[must_use]
    pub fn is_unchanged(&self) -> bool {
        self.is_unchanged
    }

    #[must_use]
    pub fn member_diffs(&self) -> &[TypeLayoutItemMemberDiff<'a>] {
        &self.member_diffs
    }

    #[must_use]
    pub fn base_type_diffs(&self) -> &[TypeLayoutItemDiff<'a>] {
        &self.base_type_diffs
    }
}

impl<'a> TypeLayoutItemMemberDiff<'a> {
    #[must_use]
    pub fn name(&self) -> &'a str {
        &self.change.either().name
    }

    #[must_use]
    pub fn change(&self) -> Change<&'a TypeLayoutItemMember> {
        self.change
    }

    #[must_use]
    pub fn size_diff_bits(&self) -> i64 {
        self.change.delta(|m| m.size_bits)
    }

    /// `None` unless the member exists on both sides.
    #[must_use]
    pub fn offset_diff_bits(&self) -> Option<i64> {
        match self.change {
            Change::Changed { before, after } => {
                Some(after.offset_bits as i64 - before.offset_bits as i64)
            }
            _ => None,
        }
    }
}

fn member_diff<'a>(
    before: Option<&'a TypeLayoutItemMember>,
    after: Option<&'a TypeLayoutItemMember>,
) -> Result<TypeLayoutItemMemberDiff<'a>> {
    Ok(TypeLayoutItemMemberDiff {
        change: Change::from_options(before, after, "type layout members")?,
    })
}

/// The members either side of a member, on one side of the diff.
#[derive(Clone, Copy)]
struct Neighbours<'a> {
    previous: Option<&'a TypeLayoutItemMember>,
    next: Option<&'a TypeLayoutItemMember>,
}

impl<'a> Neighbours<'a> {
    fn of(members: &'a [TypeLayoutItemMember], index: usize) -> Self {
        Self {
            previous: index.checked_sub(1).and_then(|i| members.get(i)),
            next: members.get(index + 1),
        }
    }

    fn any_alignment(self) -> bool {
        self.previous.is_some_and(|m| m.is_alignment_member)
            || self.next.is_some_and(|m| m.is_alignment_member)
    }
}

fn names_match(a: Option<&TypeLayoutItemMember>, b: Option<&TypeLayoutItemMember>) -> bool {
    matches!((a, b), (Some(a), Some(b)) if a.name == b.name)
}

/// Non-alignment members match by name. Alignment padding moves around when members before it
/// change, so padding at different offsets matches if its neighbours on either side agree.
fn is_same_member(
    before: &TypeLayoutItemMember,
    after: &TypeLayoutItemMember,
    before_neighbours: Neighbours<'_>,
    after_neighbours: Neighbours<'_>,
) -> Result<bool> {
    if !before.is_alignment_member && !after.is_alignment_member {
        return Ok(before.name == after.name);
    }
    if before.is_alignment_member != after.is_alignment_member {
        return Ok(false);
    }
    if before.offset_bits == after.offset_bits {
        return Ok(true);
    }

    check_invariant!(
        !before_neighbours.any_alignment() && !after_neighbours.any_alignment(),
        "Found two consecutive alignment members near offset {} bits",
        before.offset_bits
    );

    if names_match(before_neighbours.previous, after_neighbours.previous)
        || names_match(before_neighbours.next, after_neighbours.next)
    {
        return Ok(before.name == after.name);
    }
    Ok(false)
}

/// Diffs two layouts of a type. Fails with `DiffError::InvalidArguments` if both are absent, or
/// with an invariant violation if a layout has two alignment members in a row.
pub fn build_type_layout_item_diff<'a>(
    before: Option<&'a TypeLayoutItem>,
    after: Option<&'a TypeLayoutItem>,
) -> Result<Rc<TypeLayoutItemDiff<'a>>> {
    diff_type_layouts(before, after).map(Rc::new)
}

fn diff_type_layouts<'a>(
    before: Option<&'a TypeLayoutItem>,
    after: Option<&'a TypeLayoutItem>,
) -> Result<TypeLayoutItemDiff<'a>> {
    let change = Change::from_options(before, after, "type layouts")?;
    let (member_diffs, members_unchanged) = diff_members(change)?;
    let (base_type_diffs, bases_unchanged) = diff_base_types(change)?;

    let diff = TypeLayoutItemDiff {
        change,
        member_diffs,
        base_type_diffs,
        is_unchanged: change.is_changed() && members_unchanged && bases_unchanged,
    };
    trace!(
        type_name = diff.name(),
        unchanged = diff.is_unchanged,
        instance_size_diff = diff.instance_size_diff(),
        "Diffed type layout"
    );
    Ok(diff)
}

fn diff_members<'a>(
    change: Change<&'a TypeLayoutItem>,
) -> Result<(Vec<TypeLayoutItemMemberDiff<'a>>, bool)> {
    let (before, after) = match change {
        Change::Added(after) => {
            let diffs = after
                .members
                .iter()
                .map(|m| member_diff(None, Some(m)))
                .collect::<Result<_>>()?;
            return Ok((diffs, false));
        }
        Change::Removed(before) => {
            let diffs = before
                .members
                .iter()
                .map(|m| member_diff(Some(m), None))
                .collect::<Result<_>>()?;
            return Ok((diffs, false));
        }
        Change::Changed { before, after } => (&before.members, &after.members),
    };

    let mut unchanged = true;
    let mut diffs = Vec::new();

    // Tail slop exists at most once per side and always pairs with the other side's tail slop, so
    // it takes no part in the general matching.
    let mut after_left: Vec<usize> = (0..after.len())
        .filter(|i| !after[*i].is_tail_slop_alignment_member)
        .collect();
    let mut before_tail_slop = None;

    for (i, before_member) in before.iter().enumerate() {
        if before_member.is_tail_slop_alignment_member {
            before_tail_slop = Some(before_member);
            continue;
        }

        let before_neighbours = Neighbours::of(before, i);
        let mut matched = None;
        for (position, &j) in after_left.iter().enumerate() {
            if is_same_member(
                before_member,
                &after[j],
                before_neighbours,
                Neighbours::of(after, j),
            )? {
                matched = Some(position);
                break;
            }
        }
        let Some(position) = matched else {
            unchanged = false;
            diffs.push(member_diff(Some(before_member), None)?);
            continue;
        };
        let after_member = &after[after_left.remove(position)];

        if before_member.is_bit_field != after_member.is_bit_field {
            unchanged = false;
            diffs.push(member_diff(Some(before_member), None)?);
            diffs.push(member_diff(None, Some(after_member))?);
            continue;
        }

        let diff = member_diff(Some(before_member), Some(after_member))?;
        if diff.size_diff_bits() != 0 {
            unchanged = false;
        }
        diffs.push(diff);
    }

    let after_tail_slop = after.iter().find(|m| m.is_tail_slop_alignment_member);
    if let Some(before_tail_slop) = before_tail_slop {
        if after_tail_slop.is_none() {
            unchanged = false;
        }
        diffs.push(member_diff(Some(before_tail_slop), after_tail_slop)?);
    } else if let Some(after_tail_slop) = after_tail_slop {
        unchanged = false;
        diffs.push(member_diff(None, Some(after_tail_slop))?);
    }

    for j in after_left {
        unchanged = false;
        diffs.push(member_diff(None, Some(&after[j]))?);
    }

    Ok((diffs, unchanged))
}

fn diff_base_types<'a>(
    change: Change<&'a TypeLayoutItem>,
) -> Result<(Vec<TypeLayoutItemDiff<'a>>, bool)> {
    let before_bases = change.before().map_or(&[][..], |t| t.base_type_layouts.as_slice());
    let after_bases = change.after().map_or(&[][..], |t| t.base_type_layouts.as_slice());

    let mut unchanged = true;
    let mut diffs = Vec::new();
    let mut after_left: Vec<&TypeLayoutItem> = after_bases.iter().collect();

    for base in before_bases {
        let matched = after_left
            .iter()
            .position(|a| {
                a.user_defined_type
                    .is_very_likely_the_same_as(&base.user_defined_type)
            })
            .map(|position| after_left.remove(position));
        let diff = diff_type_layouts(Some(base), matched)?;
        unchanged &= diff.is_unchanged;
        diffs.push(diff);
    }
    for base in after_left {
        unchanged = false;
        diffs.push(diff_type_layouts(None, Some(base))?);
    }

    Ok((diffs, unchanged))
}

/// Pairs layouts of types that are very likely the same. When several candidates qualify, one
/// with the same instance size is preferred.
pub fn pair_type_layouts<'a>(
    before: &'a [TypeLayoutItem],
    after: &'a [TypeLayoutItem],
) -> Vec<(Option<&'a TypeLayoutItem>, Option<&'a TypeLayoutItem>)> {
    let mut after_left: Vec<&TypeLayoutItem> = after.iter().collect();
    let mut pairs = Vec::new();
    for b in before {
        let mut candidates = after_left.iter().enumerate().filter(|(_, a)| {
            a.user_defined_type
                .is_very_likely_the_same_as(&b.user_defined_type)
        });
        let first = candidates.next().map(|(i, _)| i);
        let same_size = first.and_then(|first| {
            if after_left[first].user_defined_type.instance_size
                == b.user_defined_type.instance_size
            {
                return Some(first);
            }
            let size = b.user_defined_type.instance_size;
            candidates
                .find(|(_, a)| a.user_defined_type.instance_size == size)
                .map(|(i, _)| i)
        });
        let matched = same_size.or(first).map(|i| after_left.remove(i));
        pairs.push((Some(b), matched));
    }
    pairs.extend(after_left.into_iter().map(|a| (None, Some(a))));
    pairs
}
