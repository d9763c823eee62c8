pub(crate) mod logging;

/// Returns every combination picking one element from each of the given lists, flattened into
/// a single list per combination. The first list varies fastest. An empty input, or any empty
/// list, yields no combination at all.
pub(crate) fn flat_cartesian_product<T: Clone>(lists: Vec<Vec<Vec<T>>>) -> Vec<Vec<T>> {
    if lists.is_empty() || lists.iter().any(|list| list.is_empty()) {
        return Vec::new();
    }
    let total: usize = lists.iter().map(|list| list.len()).product();
    let mut indexes = vec![0usize; lists.len()];
    let mut product = Vec::with_capacity(total);
    for _ in 0..total {
        let item = lists
            .iter()
            .zip(&indexes)
            .flat_map(|(list, index)| list[*index].iter().cloned())
            .collect::<Vec<_>>();
        product.push(item);
        for (list, index) in lists.iter().zip(indexes.iter_mut()) {
            if *index == list.len() - 1 {
                *index = 0;
            } else {
                *index += 1;
                break;
            }
        }
    }
    product
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::flat_cartesian_product;

    #[test]
    fn product_flattens_each_combination() {
        let product = flat_cartesian_product(vec![
            vec![vec!["a1"], vec!["a2"]],
            vec![vec!["b1", "b1'"], vec!["b2"]],
        ]);
        assert_eq!(
            product,
            vec![
                vec!["a1", "b1", "b1'"],
                vec!["a2", "b1", "b1'"],
                vec!["a1", "b2"],
                vec!["a2", "b2"],
            ]
        );
    }

    #[test]
    fn product_with_an_empty_list_is_empty() {
        let product = flat_cartesian_product(vec![vec![vec![1]], vec![]]);
        assert!(product.is_empty());
        let product = flat_cartesian_product::<u8>(vec![]);
        assert!(product.is_empty());
    }
}
