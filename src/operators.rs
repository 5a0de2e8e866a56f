/*!
 Operator Vocabulary

 Central authoritative table of the Mongo-flavored operator tokens the
 engine recognizes. Two consumers:
  - The `data` validator's merge check (does a payload carry update
    operators at its top level, and flattening operator sub-mappings)
  - The `query` validator's field enumeration (operator keys are stripped
    before whitelist matching)

 The vocabulary is data, not code: adding an operator means adding a row
 here, never touching the validators.
*/

/// Operators that rewrite fields of an existing document.
/// A top-level key from this list marks a payload as an operator update.
pub static UPDATE_OPERATORS: &[&str] = &[
    "$set", "$inc", "$push", "$pull", "$unset", "$pop", "$mul", "$rename", "$min", "$max", "$each",
];

/// Operators that may appear at any level of a query mapping.
pub static QUERY_OPERATORS: &[&str] = &[
    "$or",
    "$and",
    "$not",
    "$nor",
    "$in",
    "$nin",
    "$eq",
    "$neq",
    "$gt",
    "$gte",
    "$lt",
    "$lte",
    "$exists",
    "$size",
    "$all",
    "$regex",
    "$elemMatch",
];

/// Is `key` a recognized update operator?
pub fn is_update_operator(key: &str) -> bool {
    UPDATE_OPERATORS.contains(&key)
}

/// Is `key` a recognized operator of either family?
pub fn is_operator(key: &str) -> bool {
    UPDATE_OPERATORS.contains(&key) || QUERY_OPERATORS.contains(&key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_operator_membership() {
        assert!(is_update_operator("$set"));
        assert!(is_update_operator("$rename"));
        assert!(!is_update_operator("$or"));
        assert!(!is_update_operator("title"));
    }

    #[test]
    fn test_query_operator_membership() {
        assert!(is_operator("$or"));
        assert!(is_operator("$elemMatch"));
        assert!(!is_operator("$fake"));
    }
}
