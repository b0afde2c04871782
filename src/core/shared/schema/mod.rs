pub mod core;
pub use self::core::*;

pub mod ticket_tables;
pub use self::ticket_tables::*;

diesel::joinable!(comments -> tickets (ticket_id));
diesel::joinable!(timeline -> tickets (ticket_id));

diesel::allow_tables_to_appear_in_same_query!(users, idempotency_keys, tickets, comments, timeline);

#[cfg(test)]
mod tests {
    use super::*;
    use diesel::pg::Pg;
    use diesel::prelude::*;

    #[test]
    fn test_ticket_tables_join() {
        let query = tickets::table
            .inner_join(comments::table)
            .filter(tickets::id.eq(1_i64))
            .select((tickets::id, comments::body));
        let sql = diesel::debug_query::<Pg, _>(&query).to_string();
        assert!(sql.contains(r#"INNER JOIN "comments""#));
        assert!(sql.contains(r#""tickets"."id""#));
    }
}
