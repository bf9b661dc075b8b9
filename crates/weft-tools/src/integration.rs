/// Tool name to the integration type whose stored credential it needs.
///
/// Tools not listed here run without a credential.
const TOOL_INTEGRATIONS: &[(&str, &str)] = &[
    // Communication
    ("send_discord_message", "discord"),
    ("send_slack_message", "slack"),
    ("send_telegram_message", "telegram"),
    ("send_teams_message", "teams"),
    ("send_google_chat_message", "google_chat"),
    ("zoom_meeting", "zoom"),
    ("twilio_send_sms", "twilio"),
    ("twilio_send_whatsapp", "twilio"),
    // Email
    ("send_email", "sendgrid"),
    ("send_brevo_email", "brevo"),
    // Generic HTTP
    ("send_webhook", "custom_webhook"),
    ("api_request", "rest_api"),
    // Notion
    ("notion_search", "notion"),
    ("notion_query_database", "notion"),
    ("notion_create_page", "notion"),
    ("notion_update_page", "notion"),
    // GitHub / GitLab
    ("github_create_issue", "github"),
    ("github_list_issues", "github"),
    ("github_get_repo", "github"),
    ("github_add_comment", "github"),
    ("gitlab_projects", "gitlab"),
    ("gitlab_issues", "gitlab"),
    ("gitlab_mrs", "gitlab"),
    // Issue trackers
    ("linear_issues", "linear"),
    ("linear_create_issue", "linear"),
    ("linear_update_issue", "linear"),
    ("jira_issues", "jira"),
    ("jira_create_issue", "jira"),
    ("jira_update_issue", "jira"),
    ("clickup_tasks", "clickup"),
    ("clickup_create_task", "clickup"),
    ("clickup_update_task", "clickup"),
    ("trello_boards", "trello"),
    ("trello_lists", "trello"),
    ("trello_cards", "trello"),
    ("trello_create_card", "trello"),
    // Data stores
    ("airtable_list", "airtable"),
    ("airtable_read", "airtable"),
    ("airtable_create", "airtable"),
    ("airtable_update", "airtable"),
    ("mongodb_query", "mongodb"),
    ("mongodb_write", "mongodb"),
    ("redis_read", "redis"),
    ("redis_write", "redis"),
    ("s3_list", "aws_s3"),
    ("s3_upload", "aws_s3"),
    ("s3_download", "aws_s3"),
    ("s3_delete", "aws_s3"),
    // CRM and marketing
    ("hubspot_contacts", "hubspot"),
    ("hubspot_deals", "hubspot"),
    ("hubspot_companies", "hubspot"),
    ("mailchimp_lists", "mailchimp"),
    ("mailchimp_add_subscriber", "mailchimp"),
    // Analytics
    ("mixpanel_track", "mixpanel"),
    ("mixpanel_user_profile", "mixpanel"),
    ("posthog_capture", "posthog"),
    ("posthog_identify", "posthog"),
    ("posthog_query", "posthog"),
    // Commerce and deployment
    ("shopify_products", "shopify"),
    ("shopify_orders", "shopify"),
    ("shopify_customers", "shopify"),
    ("netlify_sites", "netlify"),
    ("netlify_deploys", "netlify"),
    ("netlify_trigger_build", "netlify"),
];

/// Integration type for a tool, if it needs a credential.
pub fn integration_for(tool_name: &str) -> Option<&'static str> {
    TOOL_INTEGRATIONS
        .iter()
        .find(|(tool, _)| *tool == tool_name)
        .map(|(_, integration)| *integration)
}
