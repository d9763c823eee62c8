use std::fmt::Write;

use apollo_compiler::executable::FieldSet;
use apollo_compiler::executable::Selection;
use apollo_compiler::executable::SelectionSet;
use apollo_compiler::schema::NamedType;

use crate::error::FederationError;
use crate::error::MultipleFederationErrors;
use crate::error::SingleFederationError;
use crate::schema::ValidFederationSchema;

// Field set strings do not allow the alias syntax, but the standard GraphQL parser accepts it, so
// we need this secondary check.
fn check_absence_of_aliases(selection_set: &SelectionSet) -> Result<(), FederationError> {
    fn visit_selection_set(errors: &mut MultipleFederationErrors, selection_set: &SelectionSet) {
        for selection in &selection_set.selections {
            match selection {
                Selection::Field(field) => {
                    if let Some(alias) = &field.alias {
                        errors.errors.push(SingleFederationError::InvalidFieldSet {
                            message: format!(
                                r#"Cannot use alias "{alias}" in "{}": aliases are not supported in field sets"#,
                                field.name,
                            ),
                        });
                    }
                    visit_selection_set(errors, &field.selection_set);
                }
                Selection::InlineFragment(fragment) => {
                    visit_selection_set(errors, &fragment.selection_set)
                }
                Selection::FragmentSpread(_) => {}
            }
        }
    }

    let mut errors = MultipleFederationErrors { errors: vec![] };
    visit_selection_set(&mut errors, selection_set);
    match errors.errors.len() {
        0 => Ok(()),
        1 => Err(errors.errors.remove(0).into()),
        _ => Err(errors.into()),
    }
}

/// Parses the `fields` argument of a `@key`, `@requires` or `@provides` application against the
/// given parent type.
pub(crate) fn parse_field_set(
    schema: &ValidFederationSchema,
    parent_type_name: NamedType,
    field_set: &str,
) -> Result<SelectionSet, FederationError> {
    // Note this parsing takes care of adding curly braces ("{" and "}") if they aren't in the
    // string.
    let parsed = FieldSet::parse_and_validate(
        schema.schema(),
        parent_type_name.clone(),
        field_set,
        "field_set.graphql",
    )
    .map_err(|with_errors| SingleFederationError::InvalidFieldSet {
        message: format!(
            "Invalid field set \"{field_set}\" for type \"{parent_type_name}\":\n{}",
            with_errors.errors
        ),
    })?;
    let selection_set = parsed.into_inner().selection_set;
    check_absence_of_aliases(&selection_set)?;
    Ok(selection_set)
}

/// Prints a field set on a single line, as in `{ id org { id } }`. Without outer braces, this is
/// the form field sets are written in directive arguments.
pub(crate) fn print_field_set(selection_set: &SelectionSet, with_outer_braces: bool) -> String {
    let mut output = String::new();
    let inner = selection_set
        .selections
        .iter()
        .map(print_selection)
        .collect::<Vec<_>>()
        .join(" ");
    if with_outer_braces {
        let _ = write!(output, "{{ {inner} }}");
    } else {
        output.push_str(&inner);
    }
    output
}

fn print_selection(selection: &Selection) -> String {
    let (head, selection_set) = match selection {
        Selection::Field(field) => {
            let mut head = field.name.to_string();
            if !field.arguments.is_empty() {
                let arguments = field
                    .arguments
                    .iter()
                    .map(|argument| format!("{}: {}", argument.name, argument.value))
                    .collect::<Vec<_>>()
                    .join(", ");
                let _ = write!(head, "({arguments})");
            }
            (head, &field.selection_set)
        }
        Selection::InlineFragment(fragment) => {
            let head = match &fragment.type_condition {
                Some(type_condition) => format!("... on {type_condition}"),
                None => "...".to_owned(),
            };
            (head, &fragment.selection_set)
        }
        Selection::FragmentSpread(spread) => return format!("...{}", spread.fragment_name),
    };
    if selection_set.selections.is_empty() {
        head
    } else {
        format!("{head} {}", print_field_set(selection_set, true))
    }
}

#[cfg(test)]
mod tests {
    use apollo_compiler::Schema;
    use apollo_compiler::name;

    use super::*;

    fn schema() -> ValidFederationSchema {
        ValidFederationSchema::new(
            Schema::parse_and_validate(
                r#"
                type Query { t: T }
                type T { id: ID! org: Org other(x: Int): Int }
                type Org { id: ID! name: String }
                "#,
                "schema.graphql",
            )
            .unwrap(),
        )
    }

    #[test]
    fn parses_and_prints_field_sets() {
        let schema = schema();
        let selection_set = parse_field_set(&schema, name!("T"), "id org { id name }").unwrap();
        assert_eq!(
            print_field_set(&selection_set, true),
            "{ id org { id name } }"
        );
        assert_eq!(print_field_set(&selection_set, false), "id org { id name }");

        let selection_set = parse_field_set(&schema, name!("T"), "other(x: 1)").unwrap();
        assert_eq!(print_field_set(&selection_set, false), "other(x: 1)");
    }

    #[test]
    fn rejects_unknown_fields_and_aliases() {
        let schema = schema();
        let error = parse_field_set(&schema, name!("T"), "nope").unwrap_err();
        assert!(matches!(
            error.errors()[0],
            SingleFederationError::InvalidFieldSet { .. }
        ));
        let error = parse_field_set(&schema, name!("T"), "renamed: id").unwrap_err();
        insta::assert_snapshot!(error, @r###"Cannot use alias "renamed" in "id": aliases are not supported in field sets"###);
    }
}
