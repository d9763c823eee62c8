use std::ops::Deref;
use std::sync::Arc;

use apollo_compiler::Name;
use apollo_compiler::Schema;
use apollo_compiler::ast::Type;
use apollo_compiler::schema::ExtendedType;
use apollo_compiler::validation::Valid;
use indexmap::IndexMap;
use indexmap::IndexSet;

use crate::schema::position::PositionLookupError;
use crate::schema::position::SchemaRootDefinitionKind;

pub(crate) mod field_set;
pub mod position;

/// A validated schema, with the possible runtime types of its composite types precomputed.
///
/// This is cheap to clone.
#[derive(Debug, Clone)]
pub struct ValidFederationSchema {
    schema: Arc<Valid<Schema>>,
    possible_runtime_types: Arc<IndexMap<Name, IndexSet<Name>>>,
}

impl ValidFederationSchema {
    pub fn new(schema: Valid<Schema>) -> ValidFederationSchema {
        let mut possible_runtime_types: IndexMap<Name, IndexSet<Name>> = IndexMap::new();
        for (type_name, type_) in &schema.types {
            match type_ {
                ExtendedType::Object(_) => {
                    possible_runtime_types.insert(type_name.clone(), IndexSet::from([type_name.clone()]));
                }
                ExtendedType::Interface(_) => {
                    let implementers = schema
                        .types
                        .iter()
                        .filter_map(|(name, type_)| match type_ {
                            ExtendedType::Object(object)
                                if object.implements_interfaces.contains(type_name) =>
                            {
                                Some(name.clone())
                            }
                            _ => None,
                        })
                        .collect();
                    possible_runtime_types.insert(type_name.clone(), implementers);
                }
                ExtendedType::Union(union_) => {
                    let members = union_
                        .members
                        .iter()
                        .map(|member| member.name.clone())
                        .collect();
                    possible_runtime_types.insert(type_name.clone(), members);
                }
                _ => {}
            }
        }
        Self {
            schema: Arc::new(schema),
            possible_runtime_types: Arc::new(possible_runtime_types),
        }
    }

    /// An empty schema, used as the source of the synthetic roots of federated query graphs.
    pub(crate) fn empty() -> ValidFederationSchema {
        Self::new(Valid::assume_valid(Schema::new()))
    }

    pub fn schema(&self) -> &Valid<Schema> {
        &self.schema
    }

    pub(crate) fn get_type(&self, type_name: &Name) -> Result<&ExtendedType, PositionLookupError> {
        self.schema
            .types
            .get(type_name)
            .ok_or_else(|| PositionLookupError::TypeMissing(type_name.clone()))
    }

    /// The object types a value of the given type can have at runtime. This is empty for
    /// non-composite (or unknown) types.
    pub(crate) fn possible_runtime_types(&self, type_name: &str) -> IndexSet<Name> {
        self.possible_runtime_types
            .get(type_name)
            .cloned()
            .unwrap_or_default()
    }

    pub(crate) fn is_composite_type(&self, type_name: &str) -> bool {
        matches!(
            self.schema.types.get(type_name),
            Some(ExtendedType::Object(_) | ExtendedType::Interface(_) | ExtendedType::Union(_))
        )
    }

    pub(crate) fn is_abstract_type(&self, type_name: &str) -> bool {
        matches!(
            self.schema.types.get(type_name),
            Some(ExtendedType::Interface(_) | ExtendedType::Union(_))
        )
    }

    pub(crate) fn is_leaf_type(&self, type_name: &str) -> bool {
        matches!(
            self.schema.types.get(type_name),
            Some(ExtendedType::Scalar(_) | ExtendedType::Enum(_))
        )
    }

    pub(crate) fn root_type_name(&self, root_kind: SchemaRootDefinitionKind) -> Option<&Name> {
        let definition = &self.schema.schema_definition;
        match root_kind {
            SchemaRootDefinitionKind::Query => definition.query.as_ref(),
            SchemaRootDefinitionKind::Mutation => definition.mutation.as_ref(),
            SchemaRootDefinitionKind::Subscription => definition.subscription.as_ref(),
        }
        .map(|root| &root.name)
    }

    /// The root kinds defined by this schema, with their root type names, in the order query,
    /// mutation, subscription.
    pub(crate) fn root_types(&self) -> Vec<(SchemaRootDefinitionKind, Name)> {
        [
            SchemaRootDefinitionKind::Query,
            SchemaRootDefinitionKind::Mutation,
            SchemaRootDefinitionKind::Subscription,
        ]
        .into_iter()
        .filter_map(|kind| Some((kind, self.root_type_name(kind)?.clone())))
        .collect()
    }

    /// Whether `maybe_subtype` is a direct subtype of the composite type `type_name`, that is,
    /// whether it is a member of that union or implements that interface.
    fn is_direct_subtype(&self, type_name: &Name, maybe_subtype: &Name) -> bool {
        match self.schema.types.get(type_name) {
            Some(ExtendedType::Union(union_)) => union_.members.contains(maybe_subtype),
            Some(ExtendedType::Interface(_)) => match self.schema.types.get(maybe_subtype) {
                Some(ExtendedType::Object(object)) => {
                    object.implements_interfaces.contains(type_name)
                }
                Some(ExtendedType::Interface(interface)) => {
                    interface.implements_interfaces.contains(type_name)
                }
                _ => false,
            },
            _ => false,
        }
    }

    /// Whether `maybe_subtype` is a subtype of `type_`, allowing direct subtyping (union membership
    /// and interface implementation, as defined by this schema), non-null downgrades, list
    /// propagation, list upgrades and non-null propagation.
    pub(crate) fn is_subtype(&self, type_: &Type, maybe_subtype: &Type) -> bool {
        type_ == maybe_subtype || self.is_strict_subtype(type_, maybe_subtype)
    }

    fn is_strict_subtype(&self, type_: &Type, maybe_subtype: &Type) -> bool {
        match maybe_subtype {
            Type::NonNullNamed(_) | Type::NonNullList(_) => {
                let nullable_subtype = maybe_subtype.clone().nullable();
                if type_.is_non_null() {
                    self.is_subtype(&type_.clone().nullable(), &nullable_subtype)
                } else {
                    self.is_subtype(type_, &nullable_subtype)
                }
            }
            Type::List(item_subtype) => match type_ {
                Type::List(item_type) => self.is_subtype(item_type, item_subtype),
                _ => false,
            },
            Type::Named(subtype_name) => match type_ {
                Type::List(item_type) => self.is_subtype(item_type, maybe_subtype),
                Type::Named(type_name) => {
                    self.is_composite_type(subtype_name)
                        && self.is_direct_subtype(type_name, subtype_name)
                }
                _ => false,
            },
        }
    }
}

impl Deref for ValidFederationSchema {
    type Target = Valid<Schema>;

    fn deref(&self) -> &Self::Target {
        &self.schema
    }
}

impl PartialEq for ValidFederationSchema {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.schema, &other.schema)
    }
}

impl Eq for ValidFederationSchema {}
