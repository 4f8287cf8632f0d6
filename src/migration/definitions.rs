// Ordered schema migrations. Names sort by timestamp and are never reused.

use std::collections::HashSet;

/// One forward-only migration: statements run in order inside one transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Migration {
    pub name: &'static str,
    pub statements: &'static [&'static str],
}

/// Migrations applied to every tenant schema
pub static TENANT_MIGRATIONS: &[Migration] = &[
    Migration {
        name: "20250508173003_init_tenant",
        statements: &[
            r#"create table "users" ("id" serial, "email" varchar(255) not null, "first_name" varchar(255) not null, "last_name" varchar(255) not null, "phone" varchar(255) null, "password_hash" varchar(255) not null, "is_active" boolean not null default true, "created_at" timestamptz not null, "updated_at" timestamptz not null, "last_login" timestamptz null, "test1" varchar(255) not null, constraint "users_pkey" primary key ("id"))"#,
            r#"alter table "users" add constraint "users_email_unique" unique ("email")"#,
        ],
    },
    Migration {
        name: "20250508173738_edit_test1",
        statements: &[
            r#"alter table "users" alter column "test1" type varchar(255) using ("test1"::varchar(255))"#,
            r#"alter table "users" alter column "test1" drop not null"#,
        ],
    },
];

/// Migrations applied to the shared public schema
pub static PUBLIC_MIGRATIONS: &[Migration] = &[
    Migration {
        name: "20250508172947_init_public",
        statements: &[
            r#"create table "tenants" ("id" serial, "name" varchar(255) not null, "schema_name" varchar(255) not null, "contact_email" varchar(255) not null, "contact_phone" varchar(255) null, "is_active" boolean not null default true, "created_at" timestamptz not null, "updated_at" timestamptz not null, constraint "tenants_pkey" primary key ("id"))"#,
            r#"create table "tokens" ("id" serial, "token" varchar(255) not null, "type" text check ("type" in ('user_creation')) not null, "expires_at" timestamptz not null, "is_used" boolean not null default false, "metadata" jsonb not null, "created_at" timestamptz not null, "updated_at" timestamptz not null, constraint "tokens_pkey" primary key ("id"))"#,
            r#"create index "tokens_token_index" on "tokens" ("token")"#,
        ],
    },
    Migration {
        name: "20250511155027_user_tenant_mapper",
        statements: &[
            r#"create table "user_tenant_mappers" ("id" serial primary key, "email" varchar(255) not null, "hashed_schema_name" varchar(255) not null, "created_at" timestamptz not null, "updated_at" timestamptz not null)"#,
            r#"alter table "user_tenant_mappers" add constraint "user_tenant_mappers_email_unique" unique ("email")"#,
        ],
    },
];

/// Defined migrations not yet in `executed`, in definition order
pub fn pending<'a>(defined: &'a [Migration], executed: &[String]) -> Vec<&'a Migration> {
    let executed: HashSet<&str> = executed.iter().map(String::as_str).collect();
    defined.iter().filter(|m| !executed.contains(m.name)).collect()
}

/// Tracking table written by earlier deployments of this service
pub const LEGACY_TRACKING_TABLE: &str = "mikro_orm_migrations";

/// Map a legacy tracking row (`Migration20250508173003_init_tenant.ts`) to the
/// current migration name
pub fn normalize_legacy_name(name: &str) -> &str {
    let name = name.trim();
    let name = name.strip_prefix("Migration").unwrap_or(name);
    name.strip_suffix(".ts")
        .or_else(|| name.strip_suffix(".js"))
        .unwrap_or(name)
}
