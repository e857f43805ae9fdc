use super::*;
use crate::heap::StringHandle;
use crate::value::Value;

fn name(id: u32) -> StringHandle {
    StringHandle(id)
}

#[test]
fn offsets_are_monotonic_and_footprint_sums_sizes() {
    let tables = TypeTables::new();
    let point = TypeId::structure(0);
    let def = StructureDefinition::new(
        point,
        &[
            (name(1), TypeId::INTEGER),
            (name(2), TypeId::BOOLEAN),
            (name(3), TypeId::INTEGER64),
            (name(4), TypeId::STRING),
        ],
        &tables,
    )
    .unwrap();

    let offsets: Vec<usize> = def.members().iter().map(|m| m.offset).collect();
    assert_eq!(offsets, vec![0, 4, 5, 13]);
    assert_eq!(def.footprint(), 17);
    assert_eq!(def.member_index(name(3)), Some(2));
    assert_eq!(def.member_index(name(9)), None);
}

#[test]
fn sum_members_reserve_tag_word_before_payload() {
    let mut tables = TypeTables::new();
    let number = TypeId::sum_type(0);
    let variant = VariantDefinition::new(number, &[TypeId::INTEGER, TypeId::INTEGER64], &tables).unwrap();
    assert_eq!(variant.max_payload_size(), 8);
    assert!(variant.contains(TypeId::INTEGER64));
    assert!(!variant.contains(TypeId::REAL));
    tables.insert_variant(variant).unwrap();

    let holder = TypeId::structure(1);
    let def = StructureDefinition::new(
        holder,
        &[(name(1), TypeId::INTEGER16), (name(2), number), (name(3), TypeId::INTEGER)],
        &tables,
    )
    .unwrap();
    let offsets: Vec<usize> = def.members().iter().map(|m| m.offset).collect();
    // tag word (4) + widest payload (8) between the two scalars
    assert_eq!(offsets, vec![0, 2, 14]);
    assert_eq!(def.footprint(), 18);
}

#[test]
fn nested_structures_must_be_defined_first() {
    let mut tables = TypeTables::new();
    let inner = TypeId::structure(0);
    let outer = TypeId::structure(1);
    assert!(StructureDefinition::new(outer, &[(name(1), inner)], &tables).is_err());

    let inner_def = StructureDefinition::new(inner, &[(name(2), TypeId::INTEGER)], &tables).unwrap();
    tables.insert_structure(inner_def).unwrap();
    let outer_def = StructureDefinition::new(outer, &[(name(1), inner)], &tables).unwrap();
    assert_eq!(outer_def.members()[0].nested, Some(inner));
    assert_eq!(outer_def.footprint(), 4);
}

#[test]
fn duplicate_members_and_definitions_are_rejected() {
    let mut tables = TypeTables::new();
    let t = TypeId::structure(0);
    assert!(StructureDefinition::new(t, &[(name(1), TypeId::INTEGER), (name(1), TypeId::REAL)], &tables).is_err());

    let def = StructureDefinition::new(t, &[(name(1), TypeId::INTEGER)], &tables).unwrap();
    tables.insert_structure(def.clone()).unwrap();
    assert!(tables.insert_structure(def).is_err());
}

#[test]
fn zero_values_follow_declared_types() {
    let mut tables = TypeTables::new();
    let sum = TypeId::sum_type(3);
    tables
        .insert_variant(VariantDefinition::new(sum, &[TypeId::BOOLEAN, TypeId::INTEGER], &tables).unwrap())
        .unwrap();

    assert_eq!(tables.zero_value(TypeId::INTEGER).unwrap(), Value::Integer(0));
    assert_eq!(tables.zero_value(TypeId::STRING).unwrap(), Value::String(StringHandle::NONE));
    let zero_sum = tables.zero_value(sum).unwrap();
    assert_eq!(zero_sum.type_id(), sum);
    assert_eq!(zero_sum.runtime_type(), TypeId::BOOLEAN);
    assert!(tables.zero_value(TypeId(77)).is_err());
}

#[test]
fn type_id_families() {
    assert!(TypeId::INTEGER.is_primitive());
    assert!(TypeId::structure(5).is_structure());
    assert_eq!(TypeId::structure(5).index(), 5);
    assert!(TypeId::sum_type(2).is_sum_type());
    assert_eq!(TypeId(0x0500_0000).family(), None);
    assert!(TypeId::FUNCTION.is_string_like());
    assert_eq!(TypeId::structure(1).to_string(), "structure#1");
}
