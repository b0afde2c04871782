diesel::table! {
    tickets (id) {
        id -> Int8,
        title -> Text,
        description -> Text,
        status -> Varchar,
        priority -> Varchar,
        requester_id -> Int8,
        assignee_id -> Nullable<Int8>,
        sla_due_at -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
        version -> Int8,
    }
}

diesel::table! {
    comments (id) {
        id -> Int8,
        ticket_id -> Int8,
        author_id -> Int8,
        body -> Text,
        parent_id -> Nullable<Int8>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    timeline (id) {
        id -> Int8,
        ticket_id -> Int8,
        actor_id -> Nullable<Int8>,
        action -> Varchar,
        details -> Jsonb,
        created_at -> Timestamptz,
    }
}
