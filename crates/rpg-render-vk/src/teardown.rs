// SPDX-License-Identifier: CEPL-1.0
//! Ordered creation/destruction of per-image resource lists.

/// Creates one resource per input, in order.
///
/// On the first failure every resource already created is handed to
/// `destroy`, newest first, and the error is returned. Callers never see a
/// partially built list.
pub(crate) fn create_each<I, T, E>(
    inputs: I,
    mut create: impl FnMut(I::Item) -> Result<T, E>,
    mut destroy: impl FnMut(T),
) -> Result<Vec<T>, E>
where
    I: IntoIterator,
{
    let iter = inputs.into_iter();
    let mut out = Vec::with_capacity(iter.size_hint().0);
    for input in iter {
        match create(input) {
            Ok(item) => out.push(item),
            Err(e) => {
                destroy_rev(&mut out, &mut destroy);
                return Err(e);
            }
        }
    }
    Ok(out)
}

/// Drains `items` newest-first into `destroy`.
pub(crate) fn destroy_rev<T>(items: &mut Vec<T>, mut destroy: impl FnMut(T)) {
    while let Some(item) = items.pop() {
        destroy(item);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn creates_all_in_order() {
        let out: Result<Vec<u32>, ()> = create_each(0..4u32, |i| Ok(i * 10), |_| {});
        assert_eq!(out.unwrap(), vec![0, 10, 20, 30]);
    }

    #[test]
    fn failure_unwinds_newest_first() {
        let mut destroyed = Vec::new();
        let out = create_each(
            0..5u32,
            |i| if i == 3 { Err("view 3") } else { Ok(i) },
            |i| destroyed.push(i),
        );
        assert_eq!(out, Err("view 3"));
        assert_eq!(destroyed, vec![2, 1, 0]);
    }

    #[test]
    fn failure_on_first_destroys_nothing() {
        let mut destroyed = 0;
        let out: Result<Vec<u32>, &str> = create_each(0..3u32, |_| Err("boom"), |_| destroyed += 1);
        assert!(out.is_err());
        assert_eq!(destroyed, 0);
    }

    #[test]
    fn destroy_rev_empties_list() {
        let mut items = vec![1, 2, 3];
        let mut seen = Vec::new();
        destroy_rev(&mut items, |i| seen.push(i));
        assert!(items.is_empty());
        assert_eq!(seen, vec![3, 2, 1]);
    }
}
