//! Property tests for numeric storage and record layout

mod common;

use common::*;
use dynffi_runtime::{Ffi, Value};
use proptest::prelude::*;

const MEMBER_TYPES: [&str; 8] = [
    "char", "short", "int", "long", "long long", "float", "double", "void *",
];

proptest! {
    #[test]
    fn prop_int32_round_trip(v in any::<i32>()) {
        let ffi = Ffi::new();
        let cd = ffi.new_cdata("int32_t", None, &[Value::Integer(v as i64)]).unwrap();
        prop_assert_eq!(ffi.to_number(&Value::CData(cd)), Value::Integer(v as i64));
    }

    #[test]
    fn prop_narrow_stores_truncate(v in any::<i64>()) {
        let ffi = Ffi::new();
        let byte = ffi.new_cdata("uint8_t", None, &[Value::Integer(v)]).unwrap();
        prop_assert_eq!(ffi.to_number(&Value::CData(byte)), Value::Integer((v as u8) as i64));

        let short = ffi.new_cdata("int16_t", None, &[Value::Integer(v)]).unwrap();
        prop_assert_eq!(ffi.to_number(&Value::CData(short)), Value::Integer((v as i16) as i64));
    }

    #[test]
    fn prop_double_round_trip(v in any::<f64>().prop_filter("finite", |v| v.is_finite())) {
        let ffi = Ffi::new();
        let cd = ffi.new_cdata("double", None, &[Value::Number(v)]).unwrap();
        prop_assert_eq!(ffi.to_number(&Value::CData(cd)), Value::Number(v));
    }

    #[test]
    fn prop_struct_members_are_aligned(members in prop::collection::vec(0..MEMBER_TYPES.len(), 1..12)) {
        let body: String = members
            .iter()
            .enumerate()
            .map(|(i, t)| format!("{} m{}; ", MEMBER_TYPES[*t], i))
            .collect();
        let ffi = ffi_with(&format!("struct s {{ {}}};", body));
        let record = ffi.type_of("struct s").unwrap();

        let mut end = 0;
        for (i, t) in members.iter().enumerate() {
            let member = ffi.type_of(MEMBER_TYPES[*t]).unwrap();
            let offset = ffi.offset_of("struct s", &format!("m{}", i)).unwrap().unwrap();
            prop_assert_eq!(offset % member.align(), 0);
            prop_assert!(offset >= end);
            end = offset + member.size();
        }
        prop_assert!(record.size() >= end);
        prop_assert_eq!(record.size() % record.align(), 0);
    }

    #[test]
    fn prop_union_size_covers_members(members in prop::collection::vec(0..MEMBER_TYPES.len(), 1..6)) {
        let body: String = members
            .iter()
            .enumerate()
            .map(|(i, t)| format!("{} m{}; ", MEMBER_TYPES[*t], i))
            .collect();
        let ffi = ffi_with(&format!("union u {{ {}}};", body));
        let record = ffi.type_of("union u").unwrap();
        for t in &members {
            let member = ffi.type_of(MEMBER_TYPES[*t]).unwrap();
            prop_assert!(record.size() >= member.size());
            prop_assert_eq!(record.align() % member.align(), 0);
        }
    }
}
