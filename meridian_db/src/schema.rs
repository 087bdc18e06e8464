table! {
  actor (id) {
    id -> Int4,
    canonical_id -> Text,
    preferred_username -> Nullable<Text>,
    host -> Text,
    actor_type -> Text,
    inbox_url -> Text,
    shared_inbox_url -> Nullable<Text>,
    followers_url -> Nullable<Text>,
    public_key_pem -> Nullable<Text>,
    ed25519_multikey -> Nullable<Text>,
    private_key_pem -> Nullable<Text>,
    private_ed25519_key -> Nullable<Text>,
    moved_to -> Nullable<Text>,
    also_known_as -> Array<Text>,
    manually_approves_followers -> Bool,
    suspended -> Bool,
    icon_url -> Nullable<Text>,
    gateways -> Array<Text>,
    local -> Bool,
    last_refreshed_at -> Timestamp,
    last_refresh_failed_at -> Nullable<Timestamp>,
    published -> Timestamp,
    updated -> Nullable<Timestamp>,
  }
}

table! {
  object (id) {
    id -> Int4,
    canonical_id -> Text,
    object_type -> Text,
    attributed_to -> Text,
    in_reply_to -> Nullable<Text>,
    content -> Nullable<Text>,
    summary -> Nullable<Text>,
    sensitive -> Bool,
    to_audience -> Array<Text>,
    cc_audience -> Array<Text>,
    group_audience -> Nullable<Text>,
    raw_json -> Jsonb,
    poll_end_time -> Nullable<Timestamp>,
    poll_closed_at -> Nullable<Timestamp>,
    poll_voters_count -> Nullable<Int4>,
    has_update_history -> Bool,
    deleted -> Bool,
    published -> Timestamp,
    updated -> Nullable<Timestamp>,
  }
}

table! {
  follow_edge (id) {
    id -> Int4,
    follower_actor_id -> Text,
    followed_actor_id -> Text,
    follow_activity_id -> Text,
    accepted -> Nullable<Bool>,
    inserted_at -> Timestamp,
  }
}

table! {
  outbox_entry (id) {
    id -> Int4,
    canonical_id -> Text,
    sender_actor_id -> Text,
    activity_json -> Jsonb,
    host -> Nullable<Text>,
    inserted_at -> Timestamp,
    attempts -> Int4,
    last_attempt_at -> Nullable<Timestamp>,
    sent -> Bool,
  }
}

table! {
  outbox_delivery (id) {
    id -> Int4,
    outbox_entry_id -> Int4,
    inbox_url -> Text,
    succeeded -> Bool,
    attempts -> Int4,
    last_attempt_at -> Nullable<Timestamp>,
  }
}

table! {
  inbox_queue_entry (id) {
    id -> Int8,
    sender_actor_id -> Text,
    activity_json -> Jsonb,
    raw_body -> Bytea,
    path -> Nullable<Text>,
    shared -> Bool,
    inserted_at -> Timestamp,
  }
}

table! {
  host_capability (host) {
    host -> Text,
    cavage_draft_rsa -> Bool,
    rfc9421_rsa -> Bool,
    rfc9421_ed25519 -> Bool,
    updated_at -> Timestamp,
  }
}

table! {
  share (id) {
    id -> Int4,
    object_canonical_id -> Text,
    actor_canonical_id -> Text,
    announce_activity_id -> Text,
    inserted_at -> Timestamp,
  }
}

table! {
  followers_sync_state (id) {
    id -> Int4,
    local_actor_id -> Text,
    remote_host -> Text,
    last_digest -> Text,
    synced_at -> Timestamp,
  }
}

allow_tables_to_appear_in_same_query!(
  actor,
  object,
  follow_edge,
  outbox_entry,
  outbox_delivery,
  inbox_queue_entry,
  host_capability,
  share,
  followers_sync_state,
);
