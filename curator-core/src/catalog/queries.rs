//! GraphQL documents for the Catalog API.
//!
//! Only the fields the mirror relies on are selected; the transport layer
//! tolerates unknown fields in responses, so Catalog upgrades that add
//! fields are harmless.

pub const SCENE_FRAGMENT: &str = r#"
fragment SceneFields on Scene {
    id
    title
    details
    url
    date
    rating100
    organized
    created_at
    updated_at
    files {
        id
        path
        size
        width
        height
        duration
        frame_rate
        bit_rate
        video_codec
        fingerprints {
            type
            value
        }
    }
    performers {
        id
        name
    }
    tags {
        id
        name
    }
    studio {
        id
        name
    }
    scene_markers {
        id
        seconds
        end_seconds
        title
        primary_tag {
            id
        }
        tags {
            id
        }
    }
}
"#;

pub fn get_scenes() -> String {
    format!(
        r#"
        query FindScenes($filter: FindFilterType, $scene_filter: SceneFilterType) {{
            findScenes(filter: $filter, scene_filter: $scene_filter) {{
                count
                scenes {{
                    ...SceneFields
                }}
            }}
        }}
        {SCENE_FRAGMENT}
        "#
    )
}

pub fn get_scene_by_id() -> String {
    format!(
        r#"
        query FindScene($id: ID!) {{
            findScene(id: $id) {{
                ...SceneFields
            }}
        }}
        {SCENE_FRAGMENT}
        "#
    )
}

pub const GET_ALL_PERFORMERS: &str = r#"
query AllPerformers {
    allPerformers {
        id
        name
        alias_list
        url
        details
        rating100
        favorite
        updated_at
    }
}
"#;

pub const FIND_PERFORMERS: &str = r#"
query FindPerformers($filter: FindFilterType, $performer_filter: PerformerFilterType) {
    findPerformers(filter: $filter, performer_filter: $performer_filter) {
        count
        performers {
            id
            name
            alias_list
            url
            details
            rating100
            favorite
            updated_at
        }
    }
}
"#;

pub const GET_ALL_TAGS: &str = r#"
query AllTags {
    allTags {
        id
        name
        description
        parent_id: parents {
            id
        }
        updated_at
    }
}
"#;

pub const FIND_TAGS: &str = r#"
query FindTags($filter: FindFilterType, $tag_filter: TagFilterType) {
    findTags(filter: $filter, tag_filter: $tag_filter) {
        count
        tags {
            id
            name
            description
            parent_id: parents {
                id
            }
            updated_at
        }
    }
}
"#;

pub const GET_ALL_STUDIOS: &str = r#"
query AllStudios {
    allStudios {
        id
        name
        url
        details
        rating100
        parent_studio {
            id
        }
        updated_at
    }
}
"#;

pub const FIND_STUDIOS: &str = r#"
query FindStudios($filter: FindFilterType, $studio_filter: StudioFilterType) {
    findStudios(filter: $filter, studio_filter: $studio_filter) {
        count
        studios {
            id
            name
            url
            details
            rating100
            parent_studio {
                id
            }
            updated_at
        }
    }
}
"#;

pub const GET_STATS: &str = r#"
query Stats {
    stats {
        scene_count
        performer_count
        tag_count
        studio_count
    }
}
"#;

pub const VERSION: &str = r#"
query Version {
    version {
        version
    }
}
"#;

pub fn update_scene() -> String {
    format!(
        r#"
        mutation SceneUpdate($input: SceneUpdateInput!) {{
            sceneUpdate(input: $input) {{
                ...SceneFields
            }}
        }}
        {SCENE_FRAGMENT}
        "#
    )
}

pub const BULK_UPDATE_SCENES: &str = r#"
mutation BulkSceneUpdate($input: BulkSceneUpdateInput!) {
    bulkSceneUpdate(input: $input) {
        id
    }
}
"#;

pub const CREATE_PERFORMER: &str = r#"
mutation PerformerCreate($input: PerformerCreateInput!) {
    performerCreate(input: $input) {
        id
        name
        alias_list
    }
}
"#;

pub const CREATE_TAG: &str = r#"
mutation TagCreate($input: TagCreateInput!) {
    tagCreate(input: $input) {
        id
        name
    }
}
"#;

pub const CREATE_STUDIO: &str = r#"
mutation StudioCreate($input: StudioCreateInput!) {
    studioCreate(input: $input) {
        id
        name
    }
}
"#;

pub const CREATE_MARKER: &str = r#"
mutation SceneMarkerCreate($input: SceneMarkerCreateInput!) {
    sceneMarkerCreate(input: $input) {
        id
        seconds
        title
    }
}
"#;

pub const DELETE_MARKER: &str = r#"
mutation SceneMarkerDestroy($id: ID!) {
    sceneMarkerDestroy(id: $id)
}
"#;
